//! Scrape orchestration
//!
//! [`Scraper`] owns the renderer pool and the job scheduler and exposes the
//! single, batch and streaming entry points. Each admitted job runs through
//! [`ScrapePipeline`]: URL check, override merge, per-host pacing, static or
//! rendered retrieval, content extraction and Markdown conversion.

use crate::extract::{ContentExtractor, ReadableExtractor};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::markdown::{HtmdConverter, MarkdownConverter};
use crate::renderer::{ChromeEngine, RendererEngine};
use crate::utils::validate_url;
use crate::{
    ConfigOverride, DomainThrottle, ErrorSeverity, Job, JobExecutor, JobScheduler, Metrics,
    PoolSettings, PoolStats, RenderRouter, RendererPool, SchedulerStats, ScrapeError,
    ScrapeResult, ScrapeStream, ScraperConfig, Timing,
};
use async_trait::async_trait;
use chrono::Utc;
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Collaborators a [`Scraper`] is assembled from.
pub struct ScraperParts {
    pub engine: Arc<dyn RendererEngine>,
    pub fetcher: Arc<dyn Fetcher>,
    pub extractor: Arc<dyn ContentExtractor>,
    pub converter: Arc<dyn MarkdownConverter>,
}

/// Per-job work executed under a scheduler slot.
pub struct ScrapePipeline {
    config: ScraperConfig,
    throttle: DomainThrottle,
    router: RenderRouter,
    extractor: Arc<dyn ContentExtractor>,
    converter: Arc<dyn MarkdownConverter>,
    metrics: Metrics,
}

impl ScrapePipeline {
    async fn scrape(&self, job: &Job) -> Result<ScrapeResult, ScrapeError> {
        let start = Instant::now();
        validate_url(&job.url)?;

        let config = match &job.overrides {
            Some(overrides) => Cow::Owned(self.config.merge(overrides)?),
            None => Cow::Borrowed(&self.config),
        };

        self.throttle.wait(&job.url).await;

        let page = self.router.render(&job.url, &config).await?;
        self.metrics.record_path(page.path);

        let extract_start = Instant::now();
        let extracted = self.extractor.extract(&page.html, &page.final_url)?;
        let extraction = extract_start.elapsed();

        let convert_start = Instant::now();
        let markdown = self.converter.convert(&extracted.content, &page.final_url)?;
        let conversion = convert_start.elapsed();

        debug!(
            "Scraped {} via {:?}: {} words, {} bytes of markdown",
            job.url,
            page.path,
            extracted.metadata.word_count,
            markdown.len()
        );

        Ok(ScrapeResult {
            id: job.id.clone(),
            url: job.url.clone(),
            final_url: Some(page.final_url),
            markdown,
            metadata: extracted.metadata,
            timing: Timing {
                total: millis(start.elapsed()),
                navigation: millis(page.navigation),
                extraction: millis(extraction),
                conversion: millis(conversion),
            },
            path: Some(page.path),
            scraped_at: Utc::now(),
            error: None,
        })
    }
}

#[async_trait]
impl JobExecutor for ScrapePipeline {
    async fn execute(&self, job: Job) -> Result<ScrapeResult, ScrapeError> {
        let start = Instant::now();
        let outcome = self.scrape(&job).await;
        self.metrics.record_job(start.elapsed(), outcome.is_ok());

        if let Err(e) = &outcome {
            match e.severity() {
                ErrorSeverity::High | ErrorSeverity::Critical => {
                    error!("Scrape of {} failed: {}", job.url, e)
                }
                _ => warn!("Scrape of {} failed: {}", job.url, e),
            }
        }
        outcome
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

/// Scrape orchestrator
///
/// # Examples
///
/// ```rust,no_run
/// use page_scraper::{Scraper, ScraperConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let scraper = Scraper::new(ScraperConfig::default()).await?;
///
///     let result = scraper.scrape_one("https://example.com", None).await?;
///     println!("{}", result.markdown);
///
///     scraper.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct Scraper {
    config: ScraperConfig,
    pool: RendererPool,
    scheduler: JobScheduler<ScrapePipeline>,
    shut_down: AtomicBool,
}

impl Scraper {
    /// Launch Chrome and build a scraper with the default collaborators.
    pub async fn new(config: ScraperConfig) -> Result<Self, ScrapeError> {
        config.validate()?;
        let fetcher = HttpFetcher::new()?;
        let engine = ChromeEngine::launch(&config).await?;

        Self::with_parts(
            config,
            ScraperParts {
                engine: Arc::new(engine),
                fetcher: Arc::new(fetcher),
                extractor: Arc::new(ReadableExtractor::new()),
                converter: Arc::new(HtmdConverter::new()),
            },
        )
        .await
    }

    pub async fn with_parts(
        config: ScraperConfig,
        parts: ScraperParts,
    ) -> Result<Self, ScrapeError> {
        config.validate()?;

        let pool = match RendererPool::initialize(
            parts.engine.clone(),
            PoolSettings::from_config(&config),
        )
        .await
        {
            Ok(pool) => pool,
            Err(e) => {
                if let Err(close_err) = parts.engine.close().await {
                    warn!("Failed to close renderer engine: {}", close_err);
                }
                return Err(e);
            }
        };

        let pipeline = ScrapePipeline {
            config: config.clone(),
            throttle: DomainThrottle::new(config.per_domain_delay()),
            router: RenderRouter::new(pool.clone(), parts.fetcher),
            extractor: parts.extractor,
            converter: parts.converter,
            metrics: Metrics::new(),
        };
        let scheduler = JobScheduler::new(Arc::new(pipeline), config.concurrency);

        info!(
            "Scraper ready: {} renderers, concurrency {}, per-domain delay {}ms",
            pool.size(),
            config.concurrency,
            config.per_domain_delay_ms
        );

        Ok(Self {
            config,
            pool,
            scheduler,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    /// Scrape one URL. Errors only for an invalid override; scrape failures
    /// are reported in the result.
    pub async fn scrape_one(
        &self,
        url: impl Into<String>,
        overrides: Option<&ConfigOverride>,
    ) -> Result<ScrapeResult, ScrapeError> {
        let job = self.check_override(overrides).map(|o| Job::new(url).with_overrides(o))?;
        Ok(self.scheduler.submit(job).await)
    }

    /// Results in input order, one per URL.
    pub async fn scrape_batch<I, S>(
        &self,
        urls: I,
        overrides: Option<&ConfigOverride>,
    ) -> Result<Vec<ScrapeResult>, ScrapeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let jobs = self.jobs(urls, overrides)?;
        info!("Scraping batch of {} URLs", jobs.len());
        Ok(self.scheduler.submit_many(jobs).await)
    }

    /// Results in completion order, one per URL.
    pub fn scrape_streaming<I, S>(
        &self,
        urls: I,
        overrides: Option<&ConfigOverride>,
    ) -> Result<ScrapeStream, ScrapeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let jobs = self.jobs(urls, overrides)?;
        info!("Streaming {} URLs", jobs.len());
        Ok(self.scheduler.stream(jobs))
    }

    /// Run prepared jobs (custom priorities or per-job overrides), results in input order.
    pub async fn scrape_jobs(&self, jobs: Vec<Job>) -> Vec<ScrapeResult> {
        self.scheduler.submit_many(jobs).await
    }

    /// Run prepared jobs, results in completion order.
    pub fn stream_jobs(&self, jobs: Vec<Job>) -> ScrapeStream {
        self.scheduler.stream(jobs)
    }

    fn check_override(
        &self,
        overrides: Option<&ConfigOverride>,
    ) -> Result<Option<ConfigOverride>, ScrapeError> {
        if let Some(overrides) = overrides {
            self.config.merge(overrides)?;
        }
        Ok(overrides.cloned())
    }

    fn jobs<I, S>(
        &self,
        urls: I,
        overrides: Option<&ConfigOverride>,
    ) -> Result<Vec<Job>, ScrapeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let overrides = self.check_override(overrides)?;
        Ok(urls
            .into_iter()
            .map(|url| Job::new(url).with_overrides(overrides.clone()))
            .collect())
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Stop admitting jobs and close every renderer. Later calls do nothing.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Shutting down scraper...");
        self.scheduler.close();
        self.pool.shutdown().await;
        info!("Scraper shutdown complete");
    }
}
