//! In-memory renderer engine for tests.

use crate::renderer::{ContextOptions, RenderContext, RenderPage, RendererEngine};
use crate::{Fingerprint, ScrapeError, WaitUntil};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Default)]
struct FakeState {
    pages: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    redirects: HashMap<String, String>,
    failing_urls: Vec<String>,
    failing_scripts: Vec<String>,
    navigations: Vec<(String, Instant)>,
    scripts: Vec<String>,
    contexts: Vec<Arc<FakeContext>>,
    fail_contexts: usize,
    fail_context_at: Option<usize>,
    fail_context_closes: bool,
    visible_text: Option<u64>,
    visible_text_delay: Option<Duration>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<FakeState>,
    contexts_created: AtomicUsize,
    contexts_closed: AtomicUsize,
    pages_opened: AtomicUsize,
    pages_closed: AtomicUsize,
    engine_closes: AtomicUsize,
}

impl Shared {
    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

/// Scriptable engine: per-URL HTML, delays, redirects and failures.
pub(crate) struct FakeEngine {
    shared: Arc<Shared>,
}

impl FakeEngine {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Shared::default()),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.shared.state()
    }

    pub(crate) fn set_page(&self, url: &str, html: &str) {
        self.state().pages.insert(url.to_string(), html.to_string());
    }

    pub(crate) fn set_delay(&self, url: &str, delay: Duration) {
        self.state().delays.insert(url.to_string(), delay);
    }

    pub(crate) fn redirect(&self, from: &str, to: &str) {
        self.state()
            .redirects
            .insert(from.to_string(), to.to_string());
    }

    pub(crate) fn fail_navigation(&self, url: &str) {
        self.state().failing_urls.push(url.to_string());
    }

    pub(crate) fn fail_script(&self, script: &str) {
        self.state().failing_scripts.push(script.to_string());
    }

    /// Length reported by the visible-text check, and how long each check takes.
    pub(crate) fn set_visible_text(&self, len: u64, delay: Option<Duration>) {
        let mut state = self.state();
        state.visible_text = Some(len);
        state.visible_text_delay = delay;
    }

    pub(crate) fn fail_next_contexts(&self, count: usize) {
        self.state().fail_contexts = count;
    }

    /// Fail creation once `created` contexts exist.
    pub(crate) fn fail_context_after(&self, created: usize) {
        self.state().fail_context_at = Some(created);
    }

    pub(crate) fn fail_context_closes(&self) {
        self.state().fail_context_closes = true;
    }

    /// Make every context created so far fail its liveness probe.
    pub(crate) fn kill_contexts(&self) {
        for context in &self.state().contexts {
            context.alive.store(false, Ordering::SeqCst);
        }
    }

    pub(crate) fn navigations(&self) -> Vec<(String, Instant)> {
        self.state().navigations.clone()
    }

    pub(crate) fn scripts(&self) -> Vec<String> {
        self.state().scripts.clone()
    }

    pub(crate) fn contexts_created(&self) -> usize {
        self.shared.contexts_created.load(Ordering::SeqCst)
    }

    pub(crate) fn contexts_closed(&self) -> usize {
        self.shared.contexts_closed.load(Ordering::SeqCst)
    }

    pub(crate) fn pages_opened(&self) -> usize {
        self.shared.pages_opened.load(Ordering::SeqCst)
    }

    pub(crate) fn pages_closed(&self) -> usize {
        self.shared.pages_closed.load(Ordering::SeqCst)
    }

    pub(crate) fn engine_closes(&self) -> usize {
        self.shared.engine_closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RendererEngine for FakeEngine {
    async fn new_context(
        &self,
        _fingerprint: &Fingerprint,
        _options: &ContextOptions,
    ) -> Result<Arc<dyn RenderContext>, ScrapeError> {
        let mut state = self.state();
        let created = self.shared.contexts_created.load(Ordering::SeqCst);
        if state.fail_context_at == Some(created) {
            state.fail_context_at = None;
            return Err(ScrapeError::Renderer("context creation failed".to_string()));
        }
        if state.fail_contexts > 0 {
            state.fail_contexts -= 1;
            return Err(ScrapeError::Renderer("context creation failed".to_string()));
        }

        let context = Arc::new(FakeContext {
            shared: self.shared.clone(),
            alive: AtomicBool::new(true),
        });
        state.contexts.push(context.clone());
        self.shared.contexts_created.fetch_add(1, Ordering::SeqCst);
        Ok(context)
    }

    async fn close(&self) -> Result<(), ScrapeError> {
        self.shared.engine_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) struct FakeContext {
    shared: Arc<Shared>,
    alive: AtomicBool,
}

#[async_trait]
impl RenderContext for FakeContext {
    async fn new_page(&self) -> Result<Box<dyn RenderPage>, ScrapeError> {
        self.shared.pages_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePage {
            shared: self.shared.clone(),
            current: Mutex::new(None),
        }))
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), ScrapeError> {
        self.alive.store(false, Ordering::SeqCst);
        self.shared.contexts_closed.fetch_add(1, Ordering::SeqCst);
        if self.shared.state().fail_context_closes {
            return Err(ScrapeError::Renderer("context already gone".to_string()));
        }
        Ok(())
    }
}

struct FakePage {
    shared: Arc<Shared>,
    current: Mutex<Option<String>>,
}

#[async_trait]
impl RenderPage for FakePage {
    async fn goto(&self, url: &str, _wait_until: WaitUntil) -> Result<(), ScrapeError> {
        let (delay, fails, landed) = {
            let mut state = self.shared.state();
            state.navigations.push((url.to_string(), Instant::now()));
            (
                state.delays.get(url).copied(),
                state.failing_urls.iter().any(|u| u == url),
                state
                    .redirects
                    .get(url)
                    .cloned()
                    .unwrap_or_else(|| url.to_string()),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fails {
            return Err(ScrapeError::Navigation(format!("net::ERR_FAILED at {url}")));
        }

        *self.current.lock().unwrap() = Some(landed);
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, ScrapeError> {
        let (len, delay) = {
            let mut state = self.shared.state();
            state.scripts.push(script.to_string());
            if state.failing_scripts.iter().any(|s| s == script) {
                return Err(ScrapeError::Script("script threw".to_string()));
            }
            if !script.contains("innerText") {
                return Ok(Value::Null);
            }
            (
                state.visible_text.unwrap_or(1000),
                state.visible_text_delay,
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(json!(len))
    }

    async fn content(&self) -> Result<String, ScrapeError> {
        let current = self.current.lock().unwrap().clone().unwrap_or_default();
        Ok(self
            .shared
            .state()
            .pages
            .get(&current)
            .cloned()
            .unwrap_or_else(|| "<html><body></body></html>".to_string()))
    }

    async fn url(&self) -> Result<Option<String>, ScrapeError> {
        Ok(self.current.lock().unwrap().clone())
    }

    async fn close(self: Box<Self>) -> Result<(), ScrapeError> {
        self.shared.pages_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
