//! Renderer engine abstraction.
//!
//! An engine hands out isolated contexts; the pool keeps one context per slot.
//! Contexts open short-lived pages that load a URL and run scripts.

mod chrome;

pub use chrome::{chrome_args, ChromeEngine};

use crate::{Fingerprint, ScrapeError, WaitUntil};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-context settings fixed at creation time.
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub headers: BTreeMap<String, String>,
    pub block_rules: Vec<String>,
}

#[async_trait]
pub trait RendererEngine: Send + Sync {
    async fn new_context(
        &self,
        fingerprint: &Fingerprint,
        options: &ContextOptions,
    ) -> Result<Arc<dyn RenderContext>, ScrapeError>;

    async fn close(&self) -> Result<(), ScrapeError>;
}

#[async_trait]
pub trait RenderContext: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn RenderPage>, ScrapeError>;

    /// Cheap liveness probe run before a context is reused.
    async fn is_alive(&self) -> bool;

    async fn close(&self) -> Result<(), ScrapeError>;
}

#[async_trait]
pub trait RenderPage: Send + Sync {
    async fn goto(&self, url: &str, wait_until: WaitUntil) -> Result<(), ScrapeError>;

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, ScrapeError>;

    async fn content(&self) -> Result<String, ScrapeError>;

    /// Current URL after redirects, if the page reports one.
    async fn url(&self) -> Result<Option<String>, ScrapeError>;

    async fn close(self: Box<Self>) -> Result<(), ScrapeError>;
}
