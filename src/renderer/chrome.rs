//! Headless Chrome engine backed by chromiumoxide.
//!
//! One browser process per engine. Every pooled context is a separate
//! browser context, so cookies and storage never leak between slots.

use super::{ContextOptions, RenderContext, RenderPage, RendererEngine};
use crate::{Fingerprint, ScrapeError, ScraperConfig, WaitUntil};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{BrowserContextId, GetVersionParams};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    Headers, SetBlockedUrLsParams, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);
const IDLE_QUIET_POLLS: usize = 2;

const RESOURCE_COUNT_SCRIPT: &str = "performance.getEntriesByType('resource').length";

/// Chrome command-line arguments for a headless scraping browser.
pub fn chrome_args(config: &ScraperConfig) -> Vec<String> {
    vec![
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-features=TranslateUI".to_string(),
        "--disable-blink-features=AutomationControlled".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--mute-audio".to_string(),
        format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        ),
    ]
}

pub struct ChromeEngine {
    browser: Arc<RwLock<Browser>>,
    handler: Mutex<Option<JoinHandle<()>>>,
    handler_alive: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl ChromeEngine {
    pub async fn launch(config: &ScraperConfig) -> Result<Self, ScrapeError> {
        let user_data_dir = std::env::temp_dir().join(format!(
            "page-scraper-{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&user_data_dir).map_err(|e| {
            ScrapeError::RendererLaunch(format!("failed to create user data dir: {e}"))
        })?;

        let mut builder = BrowserConfig::builder()
            .window_size(config.viewport.width, config.viewport.height)
            .user_data_dir(&user_data_dir)
            .args(chrome_args(config));

        if let Some(chrome_path) = &config.chrome_path {
            builder = builder.chrome_executable(chrome_path);
        }

        let browser_config = builder.build().map_err(ScrapeError::RendererLaunch)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ScrapeError::RendererLaunch(e.to_string()))?;

        // The handler drives the CDP connection and must be polled for the
        // browser to make progress.
        let handler_alive = Arc::new(AtomicBool::new(true));
        let alive = handler_alive.clone();
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler event error: {}", e);
                }
            }
            alive.store(false, Ordering::Relaxed);
            info!("Browser handler stream ended");
        });

        info!("Chrome engine launched");

        Ok(Self {
            browser: Arc::new(RwLock::new(browser)),
            handler: Mutex::new(Some(handler_task)),
            handler_alive,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl RendererEngine for ChromeEngine {
    async fn new_context(
        &self,
        fingerprint: &Fingerprint,
        options: &ContextOptions,
    ) -> Result<Arc<dyn RenderContext>, ScrapeError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(ScrapeError::PoolShutdown);
        }

        let context_id = {
            let browser = self.browser.read().await;
            browser
                .execute(CreateBrowserContextParams::default())
                .await?
                .result
                .browser_context_id
        };

        debug!("Created browser context {:?}", context_id);

        Ok(Arc::new(ChromeContext {
            browser: self.browser.clone(),
            context_id,
            fingerprint: fingerprint.clone(),
            options: options.clone(),
            handler_alive: self.handler_alive.clone(),
        }))
    }

    async fn close(&self) -> Result<(), ScrapeError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let result = self.browser.write().await.close().await;
        if let Some(handler) = self.handler.lock().await.take() {
            handler.abort();
        }

        result.map(|_| ()).map_err(ScrapeError::from)
    }
}

struct ChromeContext {
    browser: Arc<RwLock<Browser>>,
    context_id: BrowserContextId,
    fingerprint: Fingerprint,
    options: ContextOptions,
    handler_alive: Arc<AtomicBool>,
}

impl ChromeContext {
    async fn apply_settings(&self, page: &Page) -> Result<(), ScrapeError> {
        let user_agent = SetUserAgentOverrideParams::builder()
            .user_agent(self.fingerprint.user_agent.clone())
            .accept_language(self.fingerprint.accept_language())
            .build()
            .map_err(ScrapeError::Renderer)?;
        page.execute(user_agent).await?;

        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(self.fingerprint.viewport.width)
            .height(self.fingerprint.viewport.height)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(ScrapeError::Renderer)?;
        page.execute(metrics).await?;

        if !self.options.headers.is_empty() {
            let headers = serde_json::to_value(&self.options.headers)?;
            page.execute(SetExtraHttpHeadersParams::new(Headers::new(headers)))
                .await?;
        }

        if !self.options.block_rules.is_empty() {
            page.execute(SetBlockedUrLsParams::new(self.options.block_rules.clone()))
                .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl RenderContext for ChromeContext {
    async fn new_page(&self) -> Result<Box<dyn RenderPage>, ScrapeError> {
        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(self.context_id.clone())
            .build()
            .map_err(ScrapeError::Renderer)?;

        let page = self.browser.read().await.new_page(params).await?;

        if let Err(e) = self.apply_settings(&page).await {
            if let Err(close_err) = page.close().await {
                warn!("Failed to close page after setup error: {}", close_err);
            }
            return Err(e);
        }

        Ok(Box::new(ChromePage { page }))
    }

    async fn is_alive(&self) -> bool {
        if !self.handler_alive.load(Ordering::Relaxed) {
            return false;
        }

        let probe = async {
            let browser = self.browser.read().await;
            browser.execute(GetVersionParams::default()).await.is_ok()
        };

        tokio::time::timeout(PROBE_TIMEOUT, probe)
            .await
            .unwrap_or(false)
    }

    async fn close(&self) -> Result<(), ScrapeError> {
        let browser = self.browser.read().await;
        browser
            .execute(DisposeBrowserContextParams::new(self.context_id.clone()))
            .await?;
        Ok(())
    }
}

struct ChromePage {
    page: Page,
}

impl ChromePage {
    /// Poll the resource-timing count until it stops growing.
    async fn wait_for_network_idle(&self) {
        let mut last = None;
        let mut quiet = 0;

        while quiet < IDLE_QUIET_POLLS {
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;

            let count = match self.evaluate(RESOURCE_COUNT_SCRIPT).await {
                Ok(value) => value.as_u64(),
                Err(e) => {
                    warn!("Network idle probe failed: {}", e);
                    return;
                }
            };

            if count.is_some() && count == last {
                quiet += 1;
            } else {
                quiet = 0;
                last = count;
            }
        }
    }
}

#[async_trait]
impl RenderPage for ChromePage {
    async fn goto(&self, url: &str, wait_until: WaitUntil) -> Result<(), ScrapeError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| ScrapeError::Navigation(e.to_string()))?;

        if wait_until == WaitUntil::NetworkIdle {
            self.wait_for_network_idle().await;
        }

        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, ScrapeError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| ScrapeError::Script(e.to_string()))?;

        Ok(result.into_value().unwrap_or(serde_json::Value::Null))
    }

    async fn content(&self) -> Result<String, ScrapeError> {
        Ok(self.page.content().await?)
    }

    async fn url(&self) -> Result<Option<String>, ScrapeError> {
        Ok(self.page.url().await?)
    }

    async fn close(self: Box<Self>) -> Result<(), ScrapeError> {
        self.page.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chrome_args_generation() {
        let config = ScraperConfig::default();
        let args = chrome_args(&config);

        assert!(args.contains(&"--no-sandbox".to_string()));
        assert!(args.contains(&"--disable-gpu".to_string()));
        assert!(args.contains(&format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        )));
    }

    #[tokio::test]
    #[ignore = "requires Chrome/Chromium installation"]
    async fn test_launch_and_render() {
        let engine = ChromeEngine::launch(&ScraperConfig::default()).await.unwrap();
        let context = engine
            .new_context(&Fingerprint::random(), &ContextOptions::default())
            .await
            .unwrap();
        assert!(context.is_alive().await);

        let page = context.new_page().await.unwrap();
        page.goto("https://example.com", WaitUntil::DomContentLoaded)
            .await
            .unwrap();
        assert!(page.content().await.unwrap().contains("Example Domain"));

        page.close().await.unwrap();
        context.close().await.unwrap();
        engine.close().await.unwrap();
    }
}
