use url::Url;

/// Extracts the lowercase host from a URL string
///
/// Returns `None` when the string does not parse as an absolute URL or has no
/// host component.
///
/// # Examples
///
/// ```
/// use web_archiver::url::extract_host;
///
/// assert_eq!(extract_host("https://EX.test/path"), Some("ex.test".to_string()));
/// assert_eq!(extract_host("/relative/path"), None);
/// ```
pub fn extract_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_lowercase()))
}
