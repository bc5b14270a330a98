use crate::{
    markdown_filename, read_url_list, ConfigOverride, Job, ProgressTracker, ScrapeResult, Scraper,
    ScraperConfig,
};
use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "page-scraper")]
#[command(about = "Scrape web pages into clean Markdown")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Configuration file path (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Renderer pool size and maximum jobs in flight")]
    pub concurrency: Option<usize>,

    #[arg(long, global = true, help = "Navigation timeout in milliseconds")]
    pub timeout: Option<u64>,

    #[arg(long, global = true, help = "Minimum delay between requests to one host in milliseconds")]
    pub per_domain_delay: Option<u64>,

    #[arg(long, global = true, help = "Always render in the browser")]
    pub skip_static: bool,

    #[arg(long, global = true, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, global = true, help = "Serve Prometheus metrics on this address")]
    pub metrics_addr: Option<SocketAddr>,

    #[arg(long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scrape URLs from a file into a directory of Markdown files
    Batch {
        #[arg(short, long, help = "Input file containing URLs (one per line)")]
        input: PathBuf,

        #[arg(short, long, help = "Output directory for Markdown files")]
        output: PathBuf,

        #[arg(long, help = "Progress reporting interval in seconds")]
        progress_interval: Option<u64>,

        #[arg(long = "override", help = "Per-job settings as JSON")]
        overrides: Option<String>,
    },

    /// Scrape a single URL
    Single {
        #[arg(short, long, help = "URL to scrape")]
        url: String,

        #[arg(short, long, help = "Output file path (stdout when absent)")]
        output: Option<PathBuf>,

        #[arg(long, help = "Print the full result as JSON")]
        json: bool,

        #[arg(long = "override", help = "Per-job settings as JSON")]
        overrides: Option<String>,
    },

    /// Scrape URLs from a file, printing one JSON result per line as each finishes
    Stream {
        #[arg(short, long, help = "Input file containing URLs (one per line)")]
        input: PathBuf,

        #[arg(long = "override", help = "Per-job settings as JSON")]
        overrides: Option<String>,
    },

    /// Validate the configuration file given with --config
    Validate,

    /// Start the renderer pool and show its health
    Health {
        #[arg(long, help = "Show every pooled renderer")]
        detailed: bool,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub success: usize,
    pub errors: usize,
}

pub struct CliRunner {
    pub config: ScraperConfig,
    pub scraper: Arc<Scraper>,
}

impl CliRunner {
    pub async fn new(config: ScraperConfig) -> anyhow::Result<Self> {
        let scraper = Scraper::new(config.clone())
            .await
            .context("failed to start scraper")?;

        Ok(Self {
            config,
            scraper: Arc::new(scraper),
        })
    }

    pub fn from_scraper(scraper: Arc<Scraper>) -> Self {
        Self {
            config: scraper.config().clone(),
            scraper,
        }
    }

    pub async fn run(&self, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::Batch {
                input,
                output,
                progress_interval,
                overrides,
            } => {
                let summary = self
                    .run_batch(&input, &output, progress_interval, overrides.as_deref())
                    .await?;
                println!(
                    "Batch complete: {} succeeded, {} failed",
                    summary.success, summary.errors
                );
                Ok(())
            }
            Commands::Single {
                url,
                output,
                json,
                overrides,
            } => {
                self.run_single(&url, output.as_deref(), json, overrides.as_deref())
                    .await
            }
            Commands::Stream { input, overrides } => {
                self.run_stream(&input, overrides.as_deref()).await
            }
            Commands::Validate => {
                print_config(&self.config);
                Ok(())
            }
            Commands::Health { detailed } => {
                self.show_health(detailed);
                Ok(())
            }
        }
    }

    pub async fn run_batch(
        &self,
        input: &Path,
        output: &Path,
        progress_interval: Option<u64>,
        overrides: Option<&str>,
    ) -> anyhow::Result<BatchSummary> {
        info!("Starting batch scrape");

        let urls = read_url_list(input)
            .await
            .with_context(|| format!("failed to read {}", input.display()))?;
        info!("Loaded {} URLs from {}", urls.len(), input.display());

        fs::create_dir_all(output).await?;

        let jobs = self.jobs(urls, overrides)?;
        let positions: HashMap<String, usize> = jobs
            .iter()
            .enumerate()
            .map(|(index, job)| (job.id.clone(), index))
            .collect();

        let tracker = Arc::new(ProgressTracker::new(jobs.len()));
        let reporter = progress_interval.map(|secs| {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(secs.max(1)));
                while !tracker.is_complete() {
                    interval.tick().await;
                    let progress = tracker.get_progress();
                    println!(
                        "Progress: {}/{} - Success: {}, Errors: {}, Rate: {:.1}/s, ETA: {:?}",
                        progress.completed,
                        progress.total,
                        progress.success,
                        progress.errors,
                        progress.rate,
                        progress.eta
                    );
                }
            })
        });

        let mut summary = BatchSummary::default();
        let mut stream = self.scraper.stream_jobs(jobs);
        while let Some(result) = stream.next().await {
            tracker.record_completion(result.is_success());

            if result.is_success() {
                let index = positions.get(&result.id).copied().unwrap_or_default();
                let path = output.join(markdown_filename(index, &result.url));
                fs::write(&path, &result.markdown)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?;
                summary.success += 1;
                info!("Saved {}", path.display());
            } else {
                summary.errors += 1;
                warn!(
                    "Failed to scrape {}: {}",
                    result.url,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
        }

        if let Some(reporter) = reporter {
            reporter.abort();
        }

        info!(
            "Batch processing completed. Success: {}, Errors: {}",
            summary.success, summary.errors
        );
        Ok(summary)
    }

    pub async fn run_single(
        &self,
        url: &str,
        output: Option<&Path>,
        json: bool,
        overrides: Option<&str>,
    ) -> anyhow::Result<()> {
        info!("Scraping: {}", url);

        let overrides = parse_override(overrides)?;
        let result = self.scraper.scrape_one(url, overrides.as_ref()).await?;

        if let Some(error) = &result.error {
            return Err(anyhow!("scrape of {} failed: {}", result.url, error));
        }

        let rendered = if json {
            serde_json::to_string_pretty(&result)?
        } else {
            result.markdown.clone()
        };

        match output {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::write(path, rendered).await?;
                print_summary(&result, path);
            }
            None => println!("{rendered}"),
        }

        Ok(())
    }

    pub async fn run_stream(&self, input: &Path, overrides: Option<&str>) -> anyhow::Result<()> {
        let urls = read_url_list(input)
            .await
            .with_context(|| format!("failed to read {}", input.display()))?;
        let jobs = self.jobs(urls, overrides)?;

        let mut stream = self.scraper.stream_jobs(jobs);
        while let Some(result) = stream.next().await {
            println!("{}", serde_json::to_string(&result)?);
        }
        Ok(())
    }

    pub fn show_health(&self, detailed: bool) {
        let pool = self.scraper.pool_stats();
        let scheduler = self.scraper.scheduler_stats();

        println!("System Health Check");
        println!("==================");
        println!("Renderer Pool:");
        println!("  Total renderers: {}", pool.total);
        println!("  Idle renderers: {}", pool.idle);
        println!("  Busy renderers: {}", pool.busy);
        println!("  Recycling renderers: {}", pool.recycling);
        println!("  Failed renderers: {}", pool.failed);
        println!("  Waiting jobs: {}", pool.waiting);

        if detailed {
            println!("\nRenderers:");
            for entry in &pool.entries {
                println!(
                    "  Renderer {}: {:?} - Uses: {}, Age: {}ms, Generation: {}",
                    entry.id, entry.state, entry.use_count, entry.age_ms, entry.generation
                );
            }
        }

        println!("\nScheduler:");
        println!("  Concurrency: {}", scheduler.concurrency);
        println!("  Running jobs: {}", scheduler.running);
        println!("  Pending jobs: {}", scheduler.pending);
    }

    fn jobs(&self, urls: Vec<String>, overrides: Option<&str>) -> anyhow::Result<Vec<Job>> {
        let overrides = parse_override(overrides)?;
        if let Some(overrides) = &overrides {
            self.config.merge(overrides)?;
        }

        Ok(urls
            .into_iter()
            .map(|url| Job::new(url).with_overrides(overrides.clone()))
            .collect())
    }
}

fn print_summary(result: &ScrapeResult, output: &Path) {
    println!("Page scraped successfully:");
    println!("  URL: {}", result.url);
    if let Some(final_url) = &result.final_url {
        if final_url != &result.url {
            println!("  Final URL: {final_url}");
        }
    }
    println!("  Output: {}", output.display());
    if let Some(path) = result.path {
        println!("  Path: {path:?}");
    }
    println!("  Words: {}", result.metadata.word_count);
    println!("  Duration: {:?}", result.timing.total_duration());
    if !result.metadata.title.is_empty() {
        println!("  Title: {}", result.metadata.title);
    }
}

pub fn parse_override(json: Option<&str>) -> anyhow::Result<Option<ConfigOverride>> {
    json.map(ConfigOverride::from_json)
        .transpose()
        .context("invalid --override")
}

/// Build the effective configuration: file (or defaults), then command-line flags.
pub async fn load_config(args: &Cli) -> anyhow::Result<ScraperConfig> {
    let mut config = match &args.config {
        Some(path) => ScraperConfig::from_file(path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ScraperConfig::default(),
    };

    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_ms = timeout;
    }
    if let Some(delay) = args.per_domain_delay {
        config.per_domain_delay_ms = delay;
    }
    if args.skip_static {
        config.skip_static_detection = true;
    }
    if let Some(chrome_path) = &args.chrome_path {
        config.chrome_path = Some(chrome_path.clone());
    }

    config.validate()?;

    info!("Configuration loaded successfully");
    info!("Concurrency: {}", config.concurrency);
    info!("Navigation timeout: {}ms", config.timeout_ms);
    info!("Per-domain delay: {}ms", config.per_domain_delay_ms);

    Ok(config)
}

pub async fn validate_config_file(path: &Path) -> anyhow::Result<()> {
    println!("Validating configuration: {}", path.display());

    let config = ScraperConfig::from_file(path).await?;
    print_config(&config);
    Ok(())
}

fn print_config(config: &ScraperConfig) {
    println!("Configuration is valid:");
    println!("  Concurrency: {}", config.concurrency);
    println!("  Max uses per renderer: {}", config.max_uses_per_renderer);
    println!("  Timeout: {}ms", config.timeout_ms);
    println!("  Wait until: {:?}", config.wait_until);
    println!("  Per-domain delay: {}ms", config.per_domain_delay_ms);
    println!("  Rotate fingerprints: {}", config.rotate_fingerprints);
    println!(
        "  Viewport: {}x{}",
        config.viewport.width, config.viewport.height
    );
}

pub fn setup_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!(e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MockFetcher;
    use crate::testing::FakeEngine;
    use crate::{HtmdConverter, ReadableExtractor, ScraperParts};

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "page-scraper",
            "batch",
            "--input",
            "urls.txt",
            "--output",
            "out",
            "--concurrency",
            "8",
            "--skip-static",
        ])
        .unwrap();

        assert_eq!(cli.concurrency, Some(8));
        assert!(cli.skip_static);
        assert!(matches!(cli.command, Commands::Batch { .. }));
    }

    #[test]
    fn test_single_override_flag() {
        let cli = Cli::try_parse_from([
            "page-scraper",
            "single",
            "--url",
            "https://example.com",
            "--override",
            r#"{"timeout_ms": 5000}"#,
        ])
        .unwrap();

        match cli.command {
            Commands::Single { url, overrides, .. } => {
                assert_eq!(url, "https://example.com");
                let parsed = parse_override(overrides.as_deref()).unwrap().unwrap();
                assert_eq!(parsed.timeout_ms, Some(5000));
            }
            _ => panic!("expected single command"),
        }
    }

    #[test]
    fn test_override_rejects_pool_settings() {
        assert!(parse_override(Some(r#"{"concurrency": 3}"#)).is_err());
        assert!(parse_override(None).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "page-scraper",
            "health",
            "--timeout",
            "5000",
            "--per-domain-delay",
            "0",
        ])
        .unwrap();

        let config = load_config(&cli).await.unwrap();
        assert_eq!(config.timeout_ms, 5000);
        assert_eq!(config.per_domain_delay_ms, 0);
        assert_eq!(config.concurrency, ScraperConfig::default().concurrency);
    }

    #[test]
    fn test_validate_uses_global_config_flag() {
        let cli =
            Cli::try_parse_from(["page-scraper", "validate", "--config", "scraper.json"]).unwrap();
        assert!(matches!(cli.command, Commands::Validate));
        assert_eq!(cli.config, Some(PathBuf::from("scraper.json")));
    }

    #[tokio::test]
    async fn test_invalid_flag_values_rejected() {
        let cli = Cli::try_parse_from(["page-scraper", "health", "--concurrency", "0"]).unwrap();
        assert!(load_config(&cli).await.is_err());
    }

    #[tokio::test]
    async fn test_batch_writes_one_file_per_success() {
        let engine = FakeEngine::new();
        engine.set_page(
            "https://a.example.com/",
            "<html><body><article><p>Alpha text</p></article></body></html>",
        );
        engine.fail_navigation("https://b.example.com/");

        let config = ScraperConfig {
            concurrency: 1,
            per_domain_delay_ms: 0,
            skip_static_detection: true,
            wait_for_content: false,
            dismiss_consent: false,
            ..Default::default()
        };
        let scraper = Scraper::with_parts(
            config,
            ScraperParts {
                engine: engine.clone(),
                fetcher: Arc::new(MockFetcher::new()),
                extractor: Arc::new(ReadableExtractor::new()),
                converter: Arc::new(HtmdConverter::new()),
            },
        )
        .await
        .unwrap();
        let runner = CliRunner::from_scraper(Arc::new(scraper));

        let dir = std::env::temp_dir().join(format!("page-scraper-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).await.unwrap();
        let input = dir.join("urls.txt");
        fs::write(
            &input,
            "# seeds\nhttps://a.example.com/\n\nhttps://b.example.com/\n",
        )
        .await
        .unwrap();
        let output = dir.join("out");

        let summary = runner.run_batch(&input, &output, None, None).await.unwrap();
        assert_eq!(
            summary,
            BatchSummary {
                success: 1,
                errors: 1
            }
        );

        let first = output.join(markdown_filename(0, "https://a.example.com/"));
        let written = fs::read_to_string(first).await.unwrap();
        assert!(written.contains("Alpha text"));
        assert!(!output
            .join(markdown_filename(1, "https://b.example.com/"))
            .exists());

        runner.scraper.shutdown().await;
        let _ = fs::remove_dir_all(&dir).await;
    }
}
