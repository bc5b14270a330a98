//! Main-content isolation and page metadata.

use crate::utils::extract_host;
use crate::{PageMetadata, ScrapeError};
use scraper::{ElementRef, Html, Selector};

/// Main content fragment plus page metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedContent {
    /// HTML of the element holding the main content
    pub content: String,
    pub metadata: PageMetadata,
}

pub trait ContentExtractor: Send + Sync {
    fn extract(&self, html: &str, url: &str) -> Result<ExtractedContent, ScrapeError>;
}

struct Selectors {
    roots: Vec<Selector>,
    og_title: Selector,
    title: Selector,
    h1: Selector,
    description: Selector,
    og_description: Selector,
    html: Selector,
    author: Selector,
    published_meta: Selector,
    time: Selector,
}

impl Selectors {
    fn new() -> Self {
        let parse = |css: &str| Selector::parse(css).expect("static selector");
        Self {
            roots: ["article", "main", "[role=main]", "body"]
                .into_iter()
                .map(parse)
                .collect(),
            og_title: parse(r#"meta[property="og:title"]"#),
            title: parse("title"),
            h1: parse("h1"),
            description: parse(r#"meta[name="description"]"#),
            og_description: parse(r#"meta[property="og:description"]"#),
            html: parse("html"),
            author: parse(r#"meta[name="author"]"#),
            published_meta: parse(r#"meta[property="article:published_time"]"#),
            time: parse("time[datetime]"),
        }
    }
}

/// Picks the first of `article`, `main`, `[role=main]`, `body` as content root.
pub struct ReadableExtractor {
    selectors: Selectors,
}

impl ReadableExtractor {
    pub fn new() -> Self {
        Self {
            selectors: Selectors::new(),
        }
    }

    fn pick_root<'a>(&self, document: &'a Html) -> ElementRef<'a> {
        self.selectors
            .roots
            .iter()
            .find_map(|selector| document.select(selector).next())
            .unwrap_or_else(|| document.root_element())
    }

    fn meta_content(document: &Html, selector: &Selector) -> Option<String> {
        document
            .select(selector)
            .filter_map(|el| el.value().attr("content"))
            .map(collapse_whitespace)
            .find(|content| !content.is_empty())
    }

    fn element_text(document: &Html, selector: &Selector) -> Option<String> {
        document
            .select(selector)
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .find(|text| !text.is_empty())
    }

    fn metadata(&self, document: &Html, root: ElementRef<'_>, url: &str) -> PageMetadata {
        let s = &self.selectors;

        let title = Self::meta_content(document, &s.og_title)
            .or_else(|| Self::element_text(document, &s.title))
            .or_else(|| Self::element_text(document, &s.h1))
            .unwrap_or_default();

        let description = Self::meta_content(document, &s.description)
            .or_else(|| Self::meta_content(document, &s.og_description))
            .unwrap_or_default();

        let language = document
            .select(&s.html)
            .next()
            .and_then(|el| el.value().attr("lang"))
            .map(str::trim)
            .filter(|lang| !lang.is_empty())
            .map(str::to_string);

        let published_date = Self::meta_content(document, &s.published_meta).or_else(|| {
            document
                .select(&s.time)
                .filter_map(|el| el.value().attr("datetime"))
                .map(str::trim)
                .find(|dt| !dt.is_empty())
                .map(str::to_string)
        });

        PageMetadata {
            title,
            description,
            domain: extract_host(url).unwrap_or_default(),
            language,
            author: Self::meta_content(document, &s.author),
            published_date,
            word_count: root.text().flat_map(str::split_whitespace).count(),
        }
    }
}

impl Default for ReadableExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentExtractor for ReadableExtractor {
    fn extract(&self, html: &str, url: &str) -> Result<ExtractedContent, ScrapeError> {
        let document = Html::parse_document(html);
        let root = self.pick_root(&document);
        let metadata = self.metadata(&document, root, url);

        if metadata.word_count == 0 {
            return Err(ScrapeError::Extraction(format!("no text content in {url}")));
        }

        Ok(ExtractedContent {
            content: root.html(),
            metadata,
        })
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
