//! Plain HTTP fetching for the static path.

use crate::ScrapeError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
    /// URL after redirects
    pub final_url: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_html(&self) -> bool {
        self.content_type.as_deref().is_some_and(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.contains("text/html") || ct.contains("application/xhtml+xml")
        })
    }
}

/// GET with redirects followed. Fails on transport errors and timeouts,
/// never on HTTP status.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn get(&self, request: FetchRequest) -> Result<FetchResponse, ScrapeError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| ScrapeError::Network(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, request: FetchRequest) -> Result<FetchResponse, ScrapeError> {
        let mut builder = self.client.get(&request.url).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                ScrapeError::Timeout(request.timeout)
            } else {
                ScrapeError::Network(e.to_string())
            }
        };

        let response = builder.send().await.map_err(map_err)?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.text().await.map_err(map_err)?;
        debug!(
            "Fetched {} -> {} ({}, {} bytes)",
            request.url,
            status,
            content_type.as_deref().unwrap_or("no content type"),
            body.len()
        );

        Ok(FetchResponse {
            status,
            content_type,
            body,
            final_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, content_type: Option<&str>) -> FetchResponse {
        FetchResponse {
            status,
            content_type: content_type.map(str::to_string),
            body: String::new(),
            final_url: "https://example.com/".to_string(),
        }
    }

    #[test]
    fn test_html_content_types() {
        assert!(response(200, Some("text/html; charset=utf-8")).is_html());
        assert!(response(200, Some("application/xhtml+xml")).is_html());
        assert!(response(200, Some("Text/HTML")).is_html());
        assert!(!response(200, Some("application/json")).is_html());
        assert!(!response(200, None).is_html());
    }

    #[test]
    fn test_success_statuses() {
        assert!(response(200, None).is_success());
        assert!(response(204, None).is_success());
        assert!(!response(304, None).is_success());
        assert!(!response(404, None).is_success());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let fetcher = HttpFetcher::new().unwrap();
        let result = fetcher
            .get(FetchRequest {
                url: "http://127.0.0.1:9/".to_string(),
                headers: BTreeMap::new(),
                timeout: Duration::from_secs(2),
            })
            .await;

        assert!(matches!(
            result,
            Err(ScrapeError::Network(_)) | Err(ScrapeError::Timeout(_))
        ));
    }
}
