//! Per-host request pacing.

use crate::utils::extract_host;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const PRUNE_THRESHOLD: usize = 100;
const PRUNE_AGE: Duration = Duration::from_secs(60);

/// Keeps at least `delay` between two dispatches to the same host.
///
/// Each call reserves the next free dispatch slot for its host before
/// sleeping, so concurrent callers for one host are spaced out instead of
/// all waking at the same instant.
pub struct DomainThrottle {
    delay: Duration,
    last_dispatch: DashMap<String, Instant>,
}

impl DomainThrottle {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_dispatch: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.delay.is_zero()
    }

    pub async fn wait(&self, url: &str) {
        if !self.is_enabled() {
            return;
        }
        let Some(host) = extract_host(url) else {
            return;
        };

        let now = Instant::now();
        if self.last_dispatch.len() > PRUNE_THRESHOLD {
            self.prune(now);
        }

        let scheduled = match self.last_dispatch.entry(host.clone()) {
            Entry::Occupied(mut last) => {
                let scheduled = (*last.get() + self.delay).max(now);
                last.insert(scheduled);
                scheduled
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                now
            }
        };

        if scheduled > now {
            debug!(
                "Pacing {} for {}ms",
                host,
                scheduled.duration_since(now).as_millis()
            );
            tokio::time::sleep_until(scheduled).await;
        }
    }

    fn prune(&self, now: Instant) {
        let before = self.last_dispatch.len();
        self.last_dispatch
            .retain(|_, last| now.saturating_duration_since(*last) < PRUNE_AGE);
        debug!(
            "Pruned pacing table from {} to {} hosts",
            before,
            self.last_dispatch.len()
        );
    }

    pub fn tracked_hosts(&self) -> usize {
        self.last_dispatch.len()
    }
}
