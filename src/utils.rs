use crate::ScrapeError;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Parse a job URL. Only http and https are accepted.
pub fn validate_url(url: &str) -> Result<Url, ScrapeError> {
    let parsed = Url::parse(url)
        .map_err(|e| ScrapeError::InvalidUrl(format!("{url}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(ScrapeError::InvalidUrl(format!(
                "{url}: unsupported scheme '{scheme}'"
            )))
        }
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(ScrapeError::InvalidUrl(format!("{url}: missing host")));
    }

    Ok(parsed)
}

/// Lowercased host of a URL, including IP hosts.
pub fn extract_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

/// Read a URL list: one URL per line, blank lines and `#` comments skipped.
pub async fn read_url_list(path: impl AsRef<Path>) -> Result<Vec<String>, ScrapeError> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

pub fn sanitize_filename(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Output file name for the markdown of the `index`th URL of a batch.
pub fn markdown_filename(index: usize, url: &str) -> String {
    let stem = Url::parse(url)
        .ok()
        .map(|u| {
            let path = u.path().trim_matches('/');
            match (u.host_str(), path.is_empty()) {
                (Some(host), true) => host.to_string(),
                (Some(host), false) => format!("{host}_{path}"),
                (None, _) => url.to_string(),
            }
        })
        .unwrap_or_else(|| url.to_string());

    let mut name = sanitize_filename(&stem);
    name.truncate(100);
    format!("{index:04}_{name}.md")
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let millis = duration.subsec_millis();

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else if seconds > 0 {
        format!("{}.{}s", seconds, millis / 100)
    } else {
        format!("{millis}ms")
    }
}

pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("test.txt"), "test.txt");
        assert_eq!(sanitize_filename("test/file.txt"), "test_file.txt");
        assert_eq!(sanitize_filename("test:file?.txt"), "test_file_.txt");
    }

    #[test]
    fn test_markdown_filename() {
        assert_eq!(
            markdown_filename(3, "https://example.com/docs/intro"),
            "0003_example.com_docs_intro.md"
        );
        assert_eq!(markdown_filename(0, "https://example.com/"), "0000_example.com.md");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs(5)), "5.0s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
        assert_eq!(format_duration(Duration::from_secs(3665)), "1h 1m 5s");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://example.com").is_ok());
        assert!(validate_url("http://127.0.0.1:8080/x").is_ok());
        assert!(matches!(
            validate_url("ftp://example.com"),
            Err(ScrapeError::InvalidUrl(_))
        ));
        assert!(validate_url("invalid-url").is_err());
    }

    #[test]
    fn test_extract_host() {
        assert_eq!(
            extract_host("https://Example.com/path"),
            Some("example.com".to_string())
        );
        assert_eq!(
            extract_host("http://127.0.0.1:3000/"),
            Some("127.0.0.1".to_string())
        );
        assert_eq!(extract_host("invalid-url"), None);
    }

    #[tokio::test]
    async fn test_read_url_list_skips_comments() {
        let path = std::env::temp_dir().join(format!("urls-{}.txt", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, "# seeds\nhttps://a.example\n\n  https://b.example  \n")
            .await
            .unwrap();

        let urls = read_url_list(&path).await.unwrap();
        assert_eq!(urls, vec!["https://a.example", "https://b.example"]);

        let _ = tokio::fs::remove_file(&path).await;
    }
}
