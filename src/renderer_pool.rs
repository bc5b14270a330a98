//! Fixed-size pool of reusable renderer contexts
//!
//! The pool owns one renderer context per slot and hands out exclusive
//! [`RendererLease`]s. Callers that find no idle slot wait in strict FIFO order.
//! Slots are recycled (old context closed, a fresh one created in the same
//! slot) after `max_uses` leases, or when a liveness probe fails before reuse.

use crate::renderer::{ContextOptions, RenderContext, RendererEngine};
use crate::{block_rules, FingerprintSource, Metrics, ScrapeError, ScraperConfig};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

const RECYCLE_BACKOFF: Duration = Duration::from_millis(100);

/// Creation-time parameters of a pool.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub size: usize,
    /// Recycle after this many leases, 0 disables
    pub max_uses: u64,
    pub recycle_attempts: usize,
    pub fingerprints: FingerprintSource,
    pub options: ContextOptions,
}

impl PoolSettings {
    pub fn from_config(config: &ScraperConfig) -> Self {
        Self {
            size: config.concurrency,
            max_uses: config.max_uses_per_renderer,
            recycle_attempts: config.recycle_attempts.max(1),
            fingerprints: FingerprintSource::from_config(config),
            options: ContextOptions {
                headers: config.extra_headers.clone(),
                block_rules: block_rules(config),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Idle,
    Busy,
    Recycling,
    /// Recycling gave up; the slot no longer takes part in rotation
    Failed,
}

struct PoolEntry {
    id: usize,
    handle: Option<Arc<dyn RenderContext>>,
    state: EntryState,
    created_at: Instant,
    use_count: u64,
    generation: u64,
}

struct PoolState {
    entries: Vec<PoolEntry>,
    idle: VecDeque<usize>,
    waiters: VecDeque<oneshot::Sender<usize>>,
    shutting_down: bool,
}

impl PoolState {
    fn all_failed(&self) -> bool {
        self.entries.iter().all(|e| e.state == EntryState::Failed)
    }

    fn busy_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.state == EntryState::Busy)
            .count()
    }
}

struct PoolInner {
    engine: Arc<dyn RendererEngine>,
    settings: PoolSettings,
    state: Mutex<PoolState>,
    metrics: Metrics,
}

/// Shared handle to a renderer pool. Clones refer to the same pool.
#[derive(Clone)]
pub struct RendererPool {
    inner: Arc<PoolInner>,
}

impl RendererPool {
    /// Create `settings.size` contexts up front. Any creation failure is fatal.
    pub async fn initialize(
        engine: Arc<dyn RendererEngine>,
        settings: PoolSettings,
    ) -> Result<Self, ScrapeError> {
        if settings.size == 0 {
            return Err(ScrapeError::InvalidConfig(
                "pool size must be greater than 0".to_string(),
            ));
        }

        let mut entries = Vec::with_capacity(settings.size);
        for id in 0..settings.size {
            match engine
                .new_context(&settings.fingerprints.next(), &settings.options)
                .await
            {
                Ok(handle) => {
                    debug!("Renderer context {} created", id);
                    entries.push(PoolEntry {
                        id,
                        handle: Some(handle),
                        state: EntryState::Idle,
                        created_at: Instant::now(),
                        use_count: 0,
                        generation: 0,
                    });
                }
                Err(e) => {
                    error!("Failed to create renderer context {}: {}", id, e);
                    for entry in entries {
                        if let Some(handle) = entry.handle {
                            if let Err(e) = handle.close().await {
                                warn!("Failed to close renderer context {}: {}", entry.id, e);
                            }
                        }
                    }
                    return Err(ScrapeError::RendererLaunch(format!(
                        "renderer context {id}: {e}"
                    )));
                }
            }
        }

        info!("Renderer pool initialized with {} contexts", entries.len());

        let idle = (0..entries.len()).collect();
        Ok(Self {
            inner: Arc::new(PoolInner {
                engine,
                settings,
                state: Mutex::new(PoolState {
                    entries,
                    idle,
                    waiters: VecDeque::new(),
                    shutting_down: false,
                }),
                metrics: Metrics::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take exclusive use of a renderer context, waiting if none is idle.
    pub async fn acquire(&self) -> Result<RendererLease, ScrapeError> {
        loop {
            let slot = self.claim_slot().await?;
            let mut claim = ClaimGuard {
                pool: self,
                slot,
                armed: true,
            };

            let (handle, use_count) = {
                let state = self.lock();
                let entry = &state.entries[slot];
                (entry.handle.clone(), entry.use_count)
            };

            let healthy = match &handle {
                Some(handle) if use_count > 0 => handle.is_alive().await,
                Some(_) => true,
                None => false,
            };

            if !healthy {
                warn!("Renderer context {} failed liveness probe, recycling", slot);
                self.inner.metrics.record_probe_failure();
                if let Err(e) = self.recycle(slot).await {
                    // The slot is out of rotation now; try another one.
                    claim.armed = false;
                    debug!("Acquire moving on after failed recycle of {}: {}", slot, e);
                    continue;
                }
            }

            let lease = {
                let mut state = self.lock();
                let entry = &mut state.entries[slot];
                match entry.handle.clone() {
                    Some(context) => {
                        entry.use_count += 1;
                        Some(RendererLease {
                            pool: self.clone(),
                            slot,
                            generation: entry.generation,
                            context,
                            released: false,
                        })
                    }
                    None => None,
                }
            };

            match lease {
                Some(lease) => {
                    claim.armed = false;
                    return Ok(lease);
                }
                // Shutdown took the handle while we were probing.
                None => return Err(ScrapeError::PoolShutdown),
            }
        }
    }

    /// Mark a slot Busy, either straight from the idle set or by queueing as a waiter.
    async fn claim_slot(&self) -> Result<usize, ScrapeError> {
        loop {
            let rx = {
                let mut state = self.lock();
                if state.shutting_down {
                    return Err(ScrapeError::PoolShutdown);
                }
                if let Some(slot) = state.idle.pop_front() {
                    state.entries[slot].state = EntryState::Busy;
                    self.inner.metrics.set_busy_renderers(state.busy_count());
                    return Ok(slot);
                }
                if state.all_failed() {
                    return Err(ScrapeError::PoolExhausted);
                }

                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                rx
            };

            let mut waiter = WaitGuard { pool: self, rx };
            if let Ok(slot) = (&mut waiter.rx).await {
                return Ok(slot);
            }
            // Sender dropped: the pool drained its waiters. Re-check why.
        }
    }

    /// Hand a Busy slot to the oldest live waiter, or return it to the idle set.
    fn make_available(&self, slot: usize) {
        let mut state = self.lock();
        if state.shutting_down {
            state.entries[slot].state = EntryState::Idle;
            return;
        }

        state.entries[slot].state = EntryState::Busy;
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.send(slot).is_ok() {
                return;
            }
        }

        state.entries[slot].state = EntryState::Idle;
        state.idle.push_back(slot);
        self.inner.metrics.set_busy_renderers(state.busy_count());
    }

    /// Give a lease back. Recycles the slot first once it has reached `max_uses`.
    pub async fn release(&self, mut lease: RendererLease) {
        lease.released = true;
        self.release_slot(lease.slot, lease.generation).await;
    }

    async fn release_slot(&self, slot: usize, generation: u64) {
        let needs_recycle = {
            let state = self.lock();
            if state.shutting_down {
                return;
            }
            let entry = &state.entries[slot];
            if entry.generation != generation || entry.state != EntryState::Busy {
                debug!(
                    "Ignoring stale lease for renderer {} (generation {}, current {})",
                    slot, generation, entry.generation
                );
                return;
            }
            self.inner.settings.max_uses > 0 && entry.use_count >= self.inner.settings.max_uses
        };

        if needs_recycle {
            debug!("Renderer {} reached its use limit, recycling", slot);
            if let Err(e) = self.recycle(slot).await {
                warn!("Renderer {} left rotation after recycle failure: {}", slot, e);
                return;
            }
        }

        self.make_available(slot);
    }

    /// Close the slot's context and create a replacement in the same slot.
    ///
    /// The slot stays unavailable for the whole operation. On success it is
    /// left Busy for the caller; on failure it is marked Failed.
    async fn recycle(&self, slot: usize) -> Result<(), ScrapeError> {
        let old = {
            let mut state = self.lock();
            let entry = &mut state.entries[slot];
            entry.state = EntryState::Recycling;
            entry.handle.take()
        };

        if let Some(old) = old {
            if let Err(e) = old.close().await {
                warn!("Failed to close renderer context {}: {}", slot, e);
            }
        }

        let settings = &self.inner.settings;
        let mut backoff = RECYCLE_BACKOFF;
        let mut last_error = ScrapeError::PoolExhausted;

        for attempt in 1..=settings.recycle_attempts {
            match self
                .inner
                .engine
                .new_context(&settings.fingerprints.next(), &settings.options)
                .await
            {
                Ok(handle) => {
                    let installed = {
                        let mut state = self.lock();
                        if state.shutting_down {
                            None
                        } else {
                            let entry = &mut state.entries[slot];
                            entry.handle = Some(handle.clone());
                            entry.state = EntryState::Busy;
                            entry.use_count = 0;
                            entry.generation += 1;
                            entry.created_at = Instant::now();
                            Some(entry.generation)
                        }
                    };

                    return match installed {
                        Some(generation) => {
                            self.inner.metrics.record_recycle();
                            info!("Renderer {} recycled (generation {})", slot, generation);
                            Ok(())
                        }
                        None => {
                            if let Err(e) = handle.close().await {
                                warn!("Failed to close renderer context {}: {}", slot, e);
                            }
                            Err(ScrapeError::PoolShutdown)
                        }
                    };
                }
                Err(e) => {
                    warn!(
                        "Recycle attempt {}/{} for renderer {} failed: {}",
                        attempt, settings.recycle_attempts, slot, e
                    );
                    last_error = e;
                    if attempt < settings.recycle_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        {
            let mut state = self.lock();
            state.entries[slot].state = EntryState::Failed;
            error!(
                "Renderer {} failed after {} recycle attempts: {}",
                slot, settings.recycle_attempts, last_error
            );
            if state.all_failed() {
                error!("Every renderer slot has failed, rejecting waiters");
                state.waiters.clear();
            }
            self.inner.metrics.set_busy_renderers(state.busy_count());
        }

        Err(last_error)
    }

    /// Close every context and the engine. Later calls do nothing.
    pub async fn shutdown(&self) {
        let handles: Vec<_> = {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
            state.waiters.clear();
            state.idle.clear();
            state
                .entries
                .iter_mut()
                .filter_map(|entry| entry.handle.take())
                .collect()
        };

        info!("Shutting down renderer pool...");

        for (i, handle) in handles.into_iter().enumerate() {
            if let Err(e) = handle.close().await {
                warn!("Failed to close renderer context {}: {}", i, e);
            }
        }

        if let Err(e) = self.inner.engine.close().await {
            warn!("Failed to close renderer engine: {}", e);
        }

        info!("Renderer pool shutdown complete");
    }

    pub fn size(&self) -> usize {
        self.inner.settings.size
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        let count = |wanted: EntryState| {
            state
                .entries
                .iter()
                .filter(|e| e.state == wanted)
                .count()
        };

        PoolStats {
            total: state.entries.len(),
            idle: count(EntryState::Idle),
            busy: count(EntryState::Busy),
            recycling: count(EntryState::Recycling),
            failed: count(EntryState::Failed),
            waiting: state.waiters.iter().filter(|w| !w.is_closed()).count(),
            entries: state
                .entries
                .iter()
                .map(|e| EntryStats {
                    id: e.id,
                    use_count: e.use_count,
                    age_ms: e.created_at.elapsed().as_millis() as u64,
                    busy: e.state == EntryState::Busy,
                    state: e.state,
                    generation: e.generation,
                })
                .collect(),
        }
    }
}

/// Exclusive use of one pooled renderer context.
///
/// Give it back with [`RendererPool::release`]. A lease dropped without
/// being released is returned by a background task.
pub struct RendererLease {
    pool: RendererPool,
    slot: usize,
    generation: u64,
    context: Arc<dyn RenderContext>,
    released: bool,
}

impl std::fmt::Debug for RendererLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererLease")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .field("released", &self.released)
            .finish()
    }
}

impl RendererLease {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn context(&self) -> &Arc<dyn RenderContext> {
        &self.context
    }
}

impl Drop for RendererLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let pool = self.pool.clone();
        let (slot, generation) = (self.slot, self.generation);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    pool.release_slot(slot, generation).await;
                });
            }
            Err(_) => pool.make_available(slot),
        }
    }
}

/// Returns a claimed slot if `acquire` is abandoned before producing a lease.
struct ClaimGuard<'a> {
    pool: &'a RendererPool,
    slot: usize,
    armed: bool,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.make_available(self.slot);
        }
    }
}

/// Keeps a slot that was handed to a waiter which stopped waiting.
struct WaitGuard<'a> {
    pool: &'a RendererPool,
    rx: oneshot::Receiver<usize>,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.rx.close();
        if let Ok(slot) = self.rx.try_recv() {
            self.pool.make_available(slot);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub idle: usize,
    pub busy: usize,
    pub recycling: usize,
    pub failed: usize,
    pub waiting: usize,
    pub entries: Vec<EntryStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryStats {
    pub id: usize,
    pub use_count: u64,
    pub age_ms: u64,
    pub busy: bool,
    pub state: EntryState,
    pub generation: u64,
}
