//! Static-or-rendered routing for a single page.
//!
//! A plain HTTP fetch is tried first when the job allows it. Its response is
//! accepted only if it is successful HTML that does not look like an
//! unrendered single-page-app shell. Everything else goes through a pooled
//! renderer.

use crate::fetch::{FetchRequest, FetchResponse, Fetcher};
use crate::renderer::{RenderContext, RenderPage};
use crate::{Fingerprint, RenderPath, RendererPool, ScrapeError, ScraperConfig};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const STATIC_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Below this much visible text a fetched page is treated as a shell.
pub const MIN_STATIC_TEXT_LEN: usize = 200;

const MIN_RENDERED_TEXT_LEN: u64 = 100;
const CONTENT_WAIT: Duration = Duration::from_secs(10);
const CONTENT_POLL_INTERVAL: Duration = Duration::from_millis(250);

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

const VISIBLE_TEXT_SCRIPT: &str =
    "document.body ? document.body.innerText.trim().length : 0";

const CONSENT_SELECTORS: &[&str] = &[
    "#onetrust-accept-btn-handler",
    "#CybotCookiebotDialogBodyLevelButtonLevelOptinAllowAll",
    "#CybotCookiebotDialogBodyButtonAccept",
    "#didomi-notice-agree-button",
    ".fc-cta-consent",
    ".qc-cmp2-summary-buttons button[mode='primary']",
    "#truste-consent-button",
    "button[aria-label='Accept all']",
    "button[aria-label='Accept cookies']",
    "[data-testid='cookie-policy-manage-dialog-accept-button']",
    ".cc-allow",
    ".cookie-consent-accept",
    "#accept-cookies",
];

static EMPTY_APP_ROOT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)<(?:div|main|section)\b[^>]*\bid\s*=\s*["'](?:root|app|__next|__nuxt|___gatsby|svelte|app-root)["'][^>]*>\s*</(?:div|main|section)>|<app-root\b[^>]*>\s*</app-root>"#,
    )
    .unwrap()
});
static HEAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<head\b[^>]*>.*?(?:</head>|<body\b)").unwrap());
// The closing tag is optional in HTML5
static BODY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<body\b[^>]*>(.*?)(?:</body>|\z)").unwrap());
static SCRIPT_OR_STYLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script>|<style\b[^>]*>.*?</style>|<!--.*?-->").unwrap()
});
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Length in characters of the body text once scripts, styles and markup are removed.
pub fn visible_text_len(html: &str) -> usize {
    let without_head;
    let body: &str = match BODY.captures(html).and_then(|c| c.get(1)) {
        Some(m) => m.as_str(),
        None => {
            without_head = HEAD.replace(html, " ");
            &*without_head
        }
    };
    let without_code = SCRIPT_OR_STYLE.replace_all(body, " ");
    let text = TAG.replace_all(&without_code, " ");
    WHITESPACE.replace_all(&text, " ").trim().chars().count()
}

/// Whether fetched HTML needs script execution to show its content.
pub fn looks_like_spa(html: &str) -> bool {
    EMPTY_APP_ROOT.is_match(html) || visible_text_len(html) < MIN_STATIC_TEXT_LEN
}

fn consent_script() -> String {
    let selectors = serde_json::to_string(CONSENT_SELECTORS).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"(() => {{
    for (const selector of {selectors}) {{
        const el = document.querySelector(selector);
        if (el && el.offsetParent !== null) {{
            el.click();
            return selector;
        }}
    }}
    return null;
}})()"#
    )
}

/// HTML snapshot produced by either path.
#[derive(Debug, Clone)]
pub struct RoutedPage {
    pub html: String,
    pub final_url: String,
    pub path: RenderPath,
    /// Time spent fetching or navigating, including a rejected static attempt
    pub navigation: Duration,
}

pub struct RenderRouter {
    pool: RendererPool,
    fetcher: Arc<dyn Fetcher>,
}

impl RenderRouter {
    pub fn new(pool: RendererPool, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { pool, fetcher }
    }

    pub async fn render(
        &self,
        url: &str,
        config: &ScraperConfig,
    ) -> Result<RoutedPage, ScrapeError> {
        let start = Instant::now();

        if config.allows_static_fetch() {
            if let Some(response) = self.try_static(url, config).await {
                debug!("Static path accepted for {}", url);
                return Ok(RoutedPage {
                    html: response.body,
                    final_url: response.final_url,
                    path: RenderPath::Static,
                    navigation: start.elapsed(),
                });
            }
        } else {
            debug!("Static path disabled for {}", url);
        }

        let (html, final_url) = self.render_in_browser(url, config).await?;
        Ok(RoutedPage {
            html,
            final_url,
            path: RenderPath::Rendered,
            navigation: start.elapsed(),
        })
    }

    /// The fetched response, if it can be used as-is.
    async fn try_static(&self, url: &str, config: &ScraperConfig) -> Option<FetchResponse> {
        let mut headers = config.extra_headers.clone();
        headers
            .entry("User-Agent".to_string())
            .or_insert_with(|| config.effective_user_agent().to_string());
        headers
            .entry("Accept".to_string())
            .or_insert_with(|| ACCEPT.to_string());
        headers
            .entry("Accept-Language".to_string())
            .or_insert_with(|| Fingerprint::from_config(config).accept_language());

        let request = FetchRequest {
            url: url.to_string(),
            headers,
            timeout: STATIC_FETCH_TIMEOUT,
        };

        match self.fetcher.get(request).await {
            Err(e) => {
                debug!("Static fetch of {} failed, rendering instead: {}", url, e);
                None
            }
            Ok(response) if !response.is_success() => {
                debug!(
                    "Static fetch of {} returned {}, rendering instead",
                    url, response.status
                );
                None
            }
            Ok(response) if !response.is_html() => {
                debug!(
                    "Static fetch of {} is not HTML ({:?}), rendering instead",
                    url, response.content_type
                );
                None
            }
            Ok(response) if looks_like_spa(&response.body) => {
                debug!("Static fetch of {} looks like an app shell, rendering instead", url);
                None
            }
            Ok(response) => Some(response),
        }
    }

    async fn render_in_browser(
        &self,
        url: &str,
        config: &ScraperConfig,
    ) -> Result<(String, String), ScrapeError> {
        let lease = self.pool.acquire().await?;
        debug!(
            "Rendering {} on renderer {} (generation {})",
            url,
            lease.slot(),
            lease.generation()
        );

        let result = open_and_capture(lease.context(), url, config).await;
        self.pool.release(lease).await;
        result
    }
}

async fn open_and_capture(
    context: &Arc<dyn RenderContext>,
    url: &str,
    config: &ScraperConfig,
) -> Result<(String, String), ScrapeError> {
    let page = context.new_page().await?;
    let result = capture(&*page, url, config).await;
    if let Err(e) = page.close().await {
        warn!("Failed to close page for {}: {}", url, e);
    }
    result
}

async fn capture(
    page: &dyn RenderPage,
    url: &str,
    config: &ScraperConfig,
) -> Result<(String, String), ScrapeError> {
    tokio::time::timeout(config.timeout(), page.goto(url, config.wait_until))
        .await
        .map_err(|_| ScrapeError::Timeout(config.timeout()))??;

    if config.wait_for_content {
        wait_for_content(page, url).await;
    }

    if config.dismiss_consent {
        dismiss_consent(page, url).await;
    }

    if !config.extra_delay().is_zero() {
        tokio::time::sleep(config.extra_delay()).await;
    }

    if let Some(script) = &config.pre_extract_script {
        page.evaluate(script).await?;
    }

    let html = page.content().await?;
    let final_url = page.url().await?.unwrap_or_else(|| url.to_string());
    Ok((html, final_url))
}

/// Poll until the page shows some text, giving up quietly after a while.
async fn wait_for_content(page: &dyn RenderPage, url: &str) {
    let poll = async {
        loop {
            match page.evaluate(VISIBLE_TEXT_SCRIPT).await {
                Ok(len) if len.as_u64().unwrap_or(0) >= MIN_RENDERED_TEXT_LEN => return,
                Ok(_) => {}
                Err(e) => {
                    debug!("Content probe failed on {}: {}", url, e);
                    return;
                }
            }
            tokio::time::sleep(CONTENT_POLL_INTERVAL).await;
        }
    };

    if tokio::time::timeout(CONTENT_WAIT, poll).await.is_err() {
        debug!("No visible content on {} yet, proceeding anyway", url);
    }
}

async fn dismiss_consent(page: &dyn RenderPage, url: &str) {
    match page.evaluate(&consent_script()).await {
        Ok(serde_json::Value::String(selector)) => {
            debug!("Dismissed consent banner on {} via {}", url, selector)
        }
        Ok(_) => {}
        Err(e) => debug!("Consent dismissal failed on {}: {}", url, e),
    }
}
