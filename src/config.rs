//! Configuration management with serde serialization/deserialization
//!
//! [`ScraperConfig`] is the fully specified configuration of a scraper instance.
//! Per-job adjustments travel as a [`ConfigOverride`], which only carries the
//! fields that may change between jobs and rejects anything else at parse time.

use crate::ScrapeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// User agent presented when fingerprint rotation is disabled and none is configured.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Upper bound accepted for `timeout_ms`.
pub const MAX_TIMEOUT_MS: u64 = 300_000;

/// Upper bound accepted for `extra_delay_ms`.
pub const MAX_EXTRA_DELAY_MS: u64 = 60_000;

/// Main configuration structure for the scraper
///
/// Controls the renderer pool, the scheduler ceiling, per-host pacing and the
/// default behavior of every job. Missing fields in a config file fall back to
/// the defaults below.
///
/// # Examples
///
/// ```rust
/// use page_scraper::ScraperConfig;
///
/// let config = ScraperConfig {
///     concurrency: 2,
///     per_domain_delay_ms: 0,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// Number of pooled renderers and maximum number of jobs in flight (default: 5)
    pub concurrency: usize,

    /// Recycle a renderer after this many uses, 0 disables recycling (default: 50)
    pub max_uses_per_renderer: u64,

    /// How many times a recycle tries to create a replacement renderer (default: 3)
    pub recycle_attempts: usize,

    /// Navigation timeout for the rendered path in milliseconds (default: 30000)
    pub timeout_ms: u64,

    /// Page readiness condition used after navigation
    pub wait_until: WaitUntil,

    /// Wait (bounded) for the page to show some visible text (default: true)
    pub wait_for_content: bool,

    /// Try to click away cookie and consent banners (default: true)
    pub dismiss_consent: bool,

    /// Fixed delay after the page is ready, in milliseconds (default: 0)
    pub extra_delay_ms: u64,

    /// Script evaluated in the page right before the HTML is captured
    pub pre_extract_script: Option<String>,

    /// Always render in a browser, never try the plain HTTP fetch (default: false)
    pub skip_static_detection: bool,

    /// Minimum spacing between two requests to the same host, 0 disables (default: 500)
    pub per_domain_delay_ms: u64,

    /// Give every new renderer a random fingerprint (default: true)
    pub rotate_fingerprints: bool,

    /// Static user agent, used when rotation is off and by the HTTP fetch
    pub user_agent: Option<String>,

    /// Static viewport, used when rotation is off
    pub viewport: Viewport,

    /// Static accept-language, used when rotation is off (default: en-US)
    pub locale: String,

    /// Block images, fonts, media and known ad/tracker hosts in renderers (default: true)
    pub block_resources: bool,

    /// Extra headers sent on both paths
    pub extra_headers: BTreeMap<String, String>,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_uses_per_renderer: 50,
            recycle_attempts: 3,
            timeout_ms: 30_000,
            wait_until: WaitUntil::default(),
            wait_for_content: true,
            dismiss_consent: true,
            extra_delay_ms: 0,
            pre_extract_script: None,
            skip_static_detection: false,
            per_domain_delay_ms: 500,
            rotate_fingerprints: true,
            user_agent: None,
            viewport: Viewport::default(),
            locale: "en-US".to_string(),
            block_resources: true,
            extra_headers: BTreeMap::new(),
            chrome_path: None,
        }
    }
}

impl ScraperConfig {
    /// Load a JSON config file; absent fields keep their defaults.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ScrapeError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: ScraperConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ScrapeError> {
        if self.concurrency == 0 {
            return Err(invalid("concurrency must be greater than 0"));
        }
        if self.recycle_attempts == 0 {
            return Err(invalid("recycle_attempts must be greater than 0"));
        }
        if self.timeout_ms == 0 || self.timeout_ms > MAX_TIMEOUT_MS {
            return Err(invalid(format!(
                "timeout_ms must be between 1 and {MAX_TIMEOUT_MS}"
            )));
        }
        if self.extra_delay_ms > MAX_EXTRA_DELAY_MS {
            return Err(invalid(format!(
                "extra_delay_ms must not exceed {MAX_EXTRA_DELAY_MS}"
            )));
        }
        if let Some(script) = &self.pre_extract_script {
            if script.trim().is_empty() {
                return Err(invalid("pre_extract_script must not be blank"));
            }
        }
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(invalid("viewport dimensions must be greater than 0"));
        }
        if self.locale.trim().is_empty() {
            return Err(invalid("locale must not be empty"));
        }
        Ok(())
    }

    /// Apply a per-job override on top of this configuration.
    pub fn merge(&self, overrides: &ConfigOverride) -> Result<ScraperConfig, ScrapeError> {
        let mut merged = self.clone();

        if let Some(timeout_ms) = overrides.timeout_ms {
            merged.timeout_ms = timeout_ms;
        }
        if let Some(wait_until) = overrides.wait_until {
            merged.wait_until = wait_until;
        }
        if let Some(wait_for_content) = overrides.wait_for_content {
            merged.wait_for_content = wait_for_content;
        }
        if let Some(dismiss_consent) = overrides.dismiss_consent {
            merged.dismiss_consent = dismiss_consent;
        }
        if let Some(extra_delay_ms) = overrides.extra_delay_ms {
            merged.extra_delay_ms = extra_delay_ms;
        }
        if let Some(script) = &overrides.pre_extract_script {
            merged.pre_extract_script = Some(script.clone());
        }
        if let Some(skip) = overrides.skip_static_detection {
            merged.skip_static_detection = skip;
        }

        merged.validate()?;
        Ok(merged)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn extra_delay(&self) -> Duration {
        Duration::from_millis(self.extra_delay_ms)
    }

    pub fn per_domain_delay(&self) -> Duration {
        Duration::from_millis(self.per_domain_delay_ms)
    }

    /// User agent for requests that are not tied to a pooled renderer.
    pub fn effective_user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }

    /// Whether the plain HTTP fetch may be tried for a job with this configuration.
    ///
    /// A pre-extraction script needs a live page, so it rules the fetch out too.
    pub fn allows_static_fetch(&self) -> bool {
        !self.skip_static_detection && self.pre_extract_script.is_none()
    }
}

fn invalid(message: impl Into<String>) -> ScrapeError {
    ScrapeError::InvalidConfig(message.into())
}

/// Per-job partial configuration.
///
/// Unknown keys, including pool-level settings such as `concurrency`, are
/// rejected when parsing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_until: Option<WaitUntil>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_for_content: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dismiss_consent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_extract_script: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_static_detection: Option<bool>,
}

impl ConfigOverride {
    pub fn from_json(json: &str) -> Result<Self, ScrapeError> {
        serde_json::from_str(json).map_err(|e| ScrapeError::InvalidConfig(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self == &ConfigOverride::default()
    }
}

/// Browser viewport presented by a renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Viewport {
    /// Viewport width in pixels (default: 1920)
    pub width: u32,

    /// Viewport height in pixels (default: 1080)
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Page readiness condition after navigation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitUntil {
    /// Wait until no new network requests start for a short quiet period
    NetworkIdle,
    /// Proceed as soon as the document has loaded
    #[default]
    DomContentLoaded,
}
