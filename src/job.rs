//! Jobs submitted to the scraper and the results they produce.

use crate::ConfigOverride;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One URL to scrape.
///
/// Lower `priority` values are dispatched first; equal priorities keep
/// submission order.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub url: String,
    pub priority: i32,
    pub overrides: Option<ConfigOverride>,
}

impl Job {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.into(),
            priority: 0,
            overrides: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_overrides(mut self, overrides: Option<ConfigOverride>) -> Self {
        self.overrides = overrides.filter(|o| !o.is_empty());
        self
    }
}

/// Which path produced the page HTML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderPath {
    /// Plain HTTP fetch, no script execution
    Static,
    /// Pooled browser renderer
    Rendered,
}

/// Stage timings of one job, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    pub total: u64,
    pub navigation: u64,
    pub extraction: u64,
    pub conversion: u64,
}

impl Timing {
    pub fn total_duration(&self) -> Duration {
        Duration::from_millis(self.total)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub title: String,
    pub description: String,
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
    pub word_count: usize,
}

/// Outcome of one job. Every submitted job produces exactly one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub id: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    pub markdown: String,
    pub metadata: PageMetadata,
    pub timing: Timing,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<RenderPath>,
    pub scraped_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScrapeResult {
    /// Error-bearing result with zeroed timings and metadata.
    pub fn failed(job: &Job, error: impl ToString) -> Self {
        Self {
            id: job.id.clone(),
            url: job.url.clone(),
            final_url: None,
            markdown: String::new(),
            metadata: PageMetadata::default(),
            timing: Timing::default(),
            path: None,
            scraped_at: Utc::now(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
