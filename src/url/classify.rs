use crate::storage::LinkKind;
use url::Url;

/// Extensions that still denote a page even though the segment has a dot
const PAGE_EXTENSIONS: &[&str] = &[".html", ".php"];

/// Returns true if the URL points at an asset rather than a page
///
/// A URL is an asset iff its final path segment contains a `.` and does not
/// end in `.html` or `.php` (case-insensitive). This is a heuristic: dotted
/// page slugs such as `/v1.2` are classified as assets.
pub fn is_asset_url(url: &str) -> bool {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url
            .split(|c| c == '?' || c == '#')
            .next()
            .unwrap_or_default()
            .to_string(),
    };

    let last_segment = path.rsplit('/').next().unwrap_or_default().to_lowercase();

    last_segment.contains('.')
        && !PAGE_EXTENSIONS
            .iter()
            .any(|extension| last_segment.ends_with(extension))
}

/// Buckets a normalized URL into the page or asset edge table
pub fn classify_link(url: &str) -> LinkKind {
    if is_asset_url(url) {
        LinkKind::Asset
    } else {
        LinkKind::Page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_with_extension_is_asset() {
        assert!(is_asset_url("http://ex.test/path/to/file.png"));
        assert!(is_asset_url("http://ex.test/static/app.JS"));
        assert_eq!(classify_link("http://ex.test/doc.pdf"), LinkKind::Asset);
    }

    #[test]
    fn test_html_and_php_are_pages() {
        assert!(!is_asset_url("http://ex.test/path/to/page.html"));
        assert!(!is_asset_url("http://ex.test/index.PHP"));
        assert!(!is_asset_url("http://ex.test/Page.HTML?x=1.png"));
    }

    #[test]
    fn test_extensionless_is_page() {
        assert!(!is_asset_url("http://ex.test/path/to/page"));
        assert!(!is_asset_url("http://ex.test/"));
        assert!(!is_asset_url("http://ex.test"));
    }

    #[test]
    fn test_dot_in_inner_segment_is_page() {
        assert!(!is_asset_url("http://ex.test/a.b/page"));
        assert_eq!(classify_link("http://ex.test/a.b/page"), LinkKind::Page);
    }

    #[test]
    fn test_query_does_not_affect_classification() {
        assert!(!is_asset_url("http://ex.test/search?q=logo.png"));
        assert!(is_asset_url("/relative/style.css?v=3"));
    }

    #[test]
    fn test_dotted_slug_heuristic() {
        assert!(is_asset_url("http://ex.test/docs/v1.2"));
    }
}
