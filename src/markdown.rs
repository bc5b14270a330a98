//! HTML to Markdown conversion.

use crate::ScrapeError;
use htmd::HtmlToMarkdown;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use url::Url;

const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "nav", "footer", "iframe", "svg", "form",
];

static LINK_TARGET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\]\(([^)\s]+)((?:\s+"[^"]*")?)\)"#).unwrap());
static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*(?:\n[ \t]*){2,}").unwrap());

pub trait MarkdownConverter: Send + Sync {
    fn convert(&self, html: &str, base_url: &str) -> Result<String, ScrapeError>;
}

/// `htmd`-based converter that also absolutizes link and image targets.
#[derive(Debug, Default, Clone)]
pub struct HtmdConverter;

impl HtmdConverter {
    pub fn new() -> Self {
        Self
    }
}

impl MarkdownConverter for HtmdConverter {
    fn convert(&self, html: &str, base_url: &str) -> Result<String, ScrapeError> {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(SKIPPED_TAGS.to_vec())
            .build();
        let markdown = converter
            .convert(html)
            .map_err(|e| ScrapeError::Conversion(e.to_string()))?;

        let markdown = match Url::parse(base_url) {
            Ok(base) => resolve_links(&markdown, &base),
            Err(_) => markdown,
        };

        Ok(collapse_blank_lines(&markdown).trim().to_string())
    }
}

/// Rewrite relative `[text](target)` and `![alt](target)` targets against `base`.
pub fn resolve_links(markdown: &str, base: &Url) -> String {
    LINK_TARGET
        .replace_all(markdown, |caps: &Captures<'_>| {
            let target = &caps[1];
            let resolved = if target.starts_with('#') || Url::parse(target).is_ok() {
                target.to_string()
            } else {
                base.join(target)
                    .map(|u| u.to_string())
                    .unwrap_or_else(|_| target.to_string())
            };
            format!("]({}{})", resolved, &caps[2])
        })
        .into_owned()
}

fn collapse_blank_lines(markdown: &str) -> String {
    BLANK_LINES.replace_all(markdown, "\n\n").into_owned()
}
