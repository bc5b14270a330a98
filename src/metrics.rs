use metrics::{Counter, Gauge, Histogram};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

use crate::RenderPath;

/// Metric handles shared by the pool and the scrape pipeline.
///
/// Handles are registered against whatever recorder is installed when
/// [`Metrics::new`] runs; without one they do nothing.
pub struct Metrics {
    pub jobs_succeeded: Counter,
    pub jobs_failed: Counter,
    pub static_path_hits: Counter,
    pub rendered_path_hits: Counter,
    pub renderer_recycles: Counter,
    pub probe_failures: Counter,
    pub job_duration: Histogram,
    pub busy_renderers: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_succeeded: metrics::register_counter!("scraper_jobs_succeeded_total"),
            jobs_failed: metrics::register_counter!("scraper_jobs_failed_total"),
            static_path_hits: metrics::register_counter!("scraper_static_path_total"),
            rendered_path_hits: metrics::register_counter!("scraper_rendered_path_total"),
            renderer_recycles: metrics::register_counter!("scraper_renderer_recycles_total"),
            probe_failures: metrics::register_counter!("scraper_probe_failures_total"),
            job_duration: metrics::register_histogram!("scraper_job_duration_seconds"),
            busy_renderers: metrics::register_gauge!("scraper_busy_renderers"),
        }
    }

    pub fn record_job(&self, duration: Duration, success: bool) {
        if success {
            self.jobs_succeeded.increment(1);
        } else {
            self.jobs_failed.increment(1);
        }

        self.job_duration.record(duration.as_secs_f64());
    }

    pub fn record_path(&self, path: RenderPath) {
        match path {
            RenderPath::Static => self.static_path_hits.increment(1),
            RenderPath::Rendered => self.rendered_path_hits.increment(1),
        }
    }

    pub fn record_recycle(&self) {
        self.renderer_recycles.increment(1);
    }

    pub fn record_probe_failure(&self) {
        self.probe_failures.increment(1);
    }

    pub fn set_busy_renderers(&self, busy: usize) {
        self.busy_renderers.set(busy as f64);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the Prometheus recorder with an HTTP scrape endpoint.
pub fn install_prometheus_exporter(addr: SocketAddr) -> Result<(), crate::ScrapeError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| crate::ScrapeError::InvalidConfig(format!("metrics exporter: {e}")))?;

    info!("Prometheus metrics exporter listening on {}", addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_inert_without_recorder() {
        let metrics = Metrics::new();
        metrics.record_job(Duration::from_millis(20), true);
        metrics.record_job(Duration::from_millis(20), false);
        metrics.record_path(RenderPath::Static);
        metrics.record_recycle();
        metrics.set_busy_renderers(3);
    }
}
