//! # Page Scraper
//!
//! Turns web pages into clean Markdown. A fixed pool of isolated headless
//! Chrome contexts renders pages that need JavaScript, while pages that are
//! already complete as plain HTML skip the browser entirely.
//!
//! ## Pipeline
//!
//! Every URL becomes a [`Job`] that flows through:
//!
//! 1. [`JobScheduler`]: priority queue with a hard ceiling on jobs in flight
//! 2. [`DomainThrottle`]: minimum spacing between requests to the same host
//! 3. [`RenderRouter`]: static HTTP fetch first, [`RendererPool`] lease when the
//!    page looks like a client-rendered app or carries too little text
//! 4. [`ReadableExtractor`]: main-content isolation and page metadata
//! 5. [`HtmdConverter`]: HTML to Markdown with absolute links
//!
//! Failures never abort a batch: each URL yields exactly one [`ScrapeResult`],
//! carrying either Markdown or an error message.
//!
//! ## Renderer pool
//!
//! - Exclusive leases, FIFO hand-off to waiting jobs
//! - Health probe before reuse, dead contexts are replaced transparently
//! - Recycling after `max_uses_per_renderer` jobs with a fresh fingerprint
//! - Idempotent shutdown that wakes every waiter
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use page_scraper::{Scraper, ScraperConfig};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scraper = Scraper::new(ScraperConfig::default()).await?;
//!
//!     let results = scraper
//!         .scrape_batch(["https://example.com", "https://www.rust-lang.org"], None)
//!         .await?;
//!     for result in &results {
//!         println!("{}: {} bytes", result.url, result.markdown.len());
//!     }
//!
//!     let mut stream = scraper.scrape_streaming(["https://example.org"], None)?;
//!     while let Some(result) = stream.next().await {
//!         println!("done: {}", result.url);
//!     }
//!
//!     scraper.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! page-scraper single --url https://example.com --output page.md
//! page-scraper batch --input urls.txt --output pages/ --concurrency 8
//! page-scraper stream --input urls.txt > results.jsonl
//! ```

/// Configuration and per-job overrides
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// Jobs and scrape results
pub mod job;

/// Renderer identities and resource blocking rules
pub mod fingerprint;

/// Browser engine abstraction and the Chrome implementation
pub mod renderer;

/// Pool of reusable isolated renderer contexts
pub mod renderer_pool;

/// Bounded priority scheduling of jobs
pub mod scheduler;

/// Per-host request pacing
pub mod throttle;

/// Plain HTTP fetching
pub mod fetch;

/// Static-or-rendered page retrieval
pub mod router;

/// Main-content extraction
pub mod extract;

/// HTML to Markdown conversion
pub mod markdown;

/// Main scrape service orchestrating the pipeline
pub mod scrape_service;

/// Command-line interface implementation
pub mod cli;

/// Performance metrics collection
pub mod metrics;

/// Utility functions and helpers
pub mod utils;

#[cfg(test)]
mod testing;


pub use crate::metrics::*;
pub use cli::*;
pub use config::*;
pub use error::*;
pub use extract::*;
pub use fetch::*;
pub use fingerprint::*;
pub use job::*;
pub use markdown::*;
pub use renderer_pool::*;
pub use router::*;
pub use scheduler::*;
pub use scrape_service::*;
pub use throttle::*;
pub use utils::*;
