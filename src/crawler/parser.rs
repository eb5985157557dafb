//! HTML parser for extracting references
//!
//! This module pulls every `href`, `src` and `data-src` attribute out of a
//! page. References are returned raw (trimmed) so the engine can resolve them
//! through its `UrlNormalizer`, which owns the scheme cache.

use scraper::{Html, Selector};
use std::collections::HashSet;

/// Attributes that can point at another page or an asset
const REFERENCE_ATTRIBUTES: &[&str] = &["href", "src", "data-src"];

/// Prefixes of references that are never fetched
const SKIPPED_PREFIXES: &[&str] = &["javascript:", "mailto:", "tel:", "data:"];

/// Extracted information from an HTML page
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    /// The page title (from <title> tag)
    pub title: Option<String>,

    /// Raw references in document order, de-duplicated
    pub references: Vec<String>,
}

/// Parses HTML content and extracts its references
///
/// # Reference Extraction Rules
///
/// **Include:** the `href`, `src` and `data-src` attribute of any element
/// (anchors, link tags, images, scripts, media sources, lazy-loaded images).
///
/// **Exclude:**
/// - `javascript:`, `mailto:`, `tel:` links
/// - Data URIs
/// - Empty and fragment-only references
///
/// # Example
///
/// ```
/// use web_archiver::crawler::parse_html;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a><img src="/logo.png"></body></html>"#;
/// let parsed = parse_html(html);
/// assert_eq!(parsed.title, Some("Test".to_string()));
/// assert_eq!(parsed.references, vec!["/page", "/logo.png"]);
/// ```
pub fn parse_html(html: &str) -> ParsedPage {
    let document = Html::parse_document(html);

    ParsedPage {
        title: extract_title(&document),
        references: extract_references(&document),
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_references(document: &Html) -> Vec<String> {
    let Ok(selector) = Selector::parse("[href], [src], [data-src]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut references = Vec::new();

    for element in document.select(&selector) {
        for attribute in REFERENCE_ATTRIBUTES {
            let Some(value) = element.value().attr(attribute) else {
                continue;
            };
            let value = value.trim();
            if is_followable(value) && seen.insert(value.to_string()) {
                references.push(value.to_string());
            }
        }
    }

    references
}

fn is_followable(reference: &str) -> bool {
    if reference.is_empty() || reference.starts_with('#') {
        return false;
    }

    let lowered = reference.to_ascii_lowercase();
    !SKIPPED_PREFIXES
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
}
