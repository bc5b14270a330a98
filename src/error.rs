use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ScrapeError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Renderer launch failed: {0}")]
    RendererLaunch(String),

    #[error("Renderer error: {0}")]
    Renderer(String),

    #[error("Page script failed: {0}")]
    Script(String),

    #[error("Renderer pool is shut down")]
    PoolShutdown,

    #[error("No healthy renderer left in the pool")]
    PoolExhausted,

    #[error("Content extraction failed: {0}")]
    Extraction(String),

    #[error("Markdown conversion failed: {0}")]
    Conversion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Job panicked: {0}")]
    JobPanicked(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ScrapeError {
    /// Whether re-submitting the same URL has a reasonable chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScrapeError::Timeout(_)
                | ScrapeError::Network(_)
                | ScrapeError::Navigation(_)
                | ScrapeError::Renderer(_)
                | ScrapeError::PoolExhausted
        )
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ScrapeError::InvalidUrl(_) => ErrorSeverity::Low,
            ScrapeError::Extraction(_) | ScrapeError::Conversion(_) => ErrorSeverity::Low,
            ScrapeError::InvalidConfig(_) => ErrorSeverity::High,
            ScrapeError::RendererLaunch(_) => ErrorSeverity::High,
            ScrapeError::PoolExhausted | ScrapeError::JobPanicked(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl From<std::io::Error> for ScrapeError {
    fn from(err: std::io::Error) -> Self {
        ScrapeError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ScrapeError {
    fn from(err: serde_json::Error) -> Self {
        ScrapeError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for ScrapeError {
    fn from(err: url::ParseError) -> Self {
        ScrapeError::InvalidUrl(err.to_string())
    }
}

impl From<chromiumoxide::error::CdpError> for ScrapeError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        ScrapeError::Renderer(err.to_string())
    }
}
