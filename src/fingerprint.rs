//! Renderer fingerprints and resource blocking rules.
//!
//! A fingerprint is fixed when a pooled renderer is created and stays with it
//! until the renderer is recycled.

use crate::{ScraperConfig, Viewport, DEFAULT_USER_AGENT};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

const USER_AGENTS: &[&str] = &[
    DEFAULT_USER_AGENT,
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36 Edg/123.0.0.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

const VIEWPORTS: &[Viewport] = &[
    Viewport { width: 1920, height: 1080 },
    Viewport { width: 1680, height: 1050 },
    Viewport { width: 1536, height: 864 },
    Viewport { width: 1440, height: 900 },
    Viewport { width: 1366, height: 768 },
    Viewport { width: 1280, height: 800 },
];

const LOCALES: &[&str] = &["en-US", "en-GB", "en-CA", "en-AU"];

const BLOCKED_HOSTS: &[&str] = &[
    "googletagmanager.com",
    "google-analytics.com",
    "googlesyndication.com",
    "googleadservices.com",
    "doubleclick.net",
    "adnxs.com",
    "amazon-adsystem.com",
    "hotjar.com",
    "mixpanel.com",
    "segment.com",
    "connect.facebook.net",
];

const BLOCKED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "avif", "svg", "ico", "woff", "woff2", "ttf", "otf",
    "mp4", "webm", "mp3",
];

/// User agent, viewport and accept-language presented by a renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub user_agent: String,
    pub viewport: Viewport,
    pub locale: String,
}

impl Fingerprint {
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            user_agent: USER_AGENTS
                .choose(&mut rng)
                .copied()
                .unwrap_or(DEFAULT_USER_AGENT)
                .to_string(),
            viewport: VIEWPORTS.choose(&mut rng).copied().unwrap_or_default(),
            locale: LOCALES.choose(&mut rng).copied().unwrap_or("en-US").to_string(),
        }
    }

    pub fn from_config(config: &ScraperConfig) -> Self {
        Self {
            user_agent: config.effective_user_agent().to_string(),
            viewport: config.viewport,
            locale: config.locale.clone(),
        }
    }

    /// Accept-Language header value for this fingerprint's locale.
    pub fn accept_language(&self) -> String {
        match self.locale.split_once('-') {
            Some((lang, _)) => format!("{},{};q=0.9", self.locale, lang),
            None => self.locale.clone(),
        }
    }
}

/// Picks the fingerprint for each newly created renderer.
#[derive(Debug, Clone)]
pub enum FingerprintSource {
    Rotating,
    Static(Fingerprint),
}

impl FingerprintSource {
    pub fn from_config(config: &ScraperConfig) -> Self {
        if config.rotate_fingerprints {
            FingerprintSource::Rotating
        } else {
            FingerprintSource::Static(Fingerprint::from_config(config))
        }
    }

    pub fn next(&self) -> Fingerprint {
        match self {
            FingerprintSource::Rotating => Fingerprint::random(),
            FingerprintSource::Static(fingerprint) => fingerprint.clone(),
        }
    }
}

/// URL patterns (`*` wildcards) a renderer should refuse to load.
pub fn block_rules(config: &ScraperConfig) -> Vec<String> {
    if !config.block_resources {
        return Vec::new();
    }

    BLOCKED_HOSTS
        .iter()
        .map(|host| format!("*{host}*"))
        .chain(BLOCKED_EXTENSIONS.iter().map(|ext| format!("*.{ext}*")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_fingerprint_comes_from_pools() {
        for _ in 0..20 {
            let fp = Fingerprint::random();
            assert!(USER_AGENTS.contains(&fp.user_agent.as_str()));
            assert!(VIEWPORTS.contains(&fp.viewport));
            assert!(LOCALES.contains(&fp.locale.as_str()));
        }
    }

    #[test]
    fn test_static_source_uses_config() {
        let config = ScraperConfig {
            rotate_fingerprints: false,
            user_agent: Some("test-agent".to_string()),
            locale: "de-DE".to_string(),
            viewport: Viewport { width: 800, height: 600 },
            ..Default::default()
        };
        let fp = FingerprintSource::from_config(&config).next();
        assert_eq!(fp.user_agent, "test-agent");
        assert_eq!(fp.viewport, Viewport { width: 800, height: 600 });
        assert_eq!(fp.accept_language(), "de-DE,de;q=0.9");
    }

    #[test]
    fn test_block_rules() {
        let config = ScraperConfig::default();
        let rules = block_rules(&config);
        assert!(rules.contains(&"*doubleclick.net*".to_string()));
        assert!(rules.contains(&"*.woff2*".to_string()));

        let open = ScraperConfig {
            block_resources: false,
            ..Default::default()
        };
        assert!(block_rules(&open).is_empty());
    }
}
