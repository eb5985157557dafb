/// Checks if a host matches an allowed-base pattern
///
/// Two pattern forms are supported:
/// 1. Exact: "ex.test" matches only "ex.test"
/// 2. Wildcard: "*.ex.test" matches "ex.test" and any subdomain of it
///
/// Both arguments are expected to be lowercase.
///
/// # Examples
///
/// ```
/// use web_archiver::url::matches_wildcard;
///
/// assert!(matches_wildcard("ex.test", "ex.test"));
/// assert!(!matches_wildcard("ex.test", "www.ex.test"));
/// assert!(matches_wildcard("*.ex.test", "www.ex.test"));
/// assert!(!matches_wildcard("*.ex.test", "notex.test"));
/// ```
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    if let Some(base) = pattern.strip_prefix("*.") {
        candidate == base || candidate.ends_with(&format!(".{}", base))
    } else {
        candidate == pattern
    }
}

/// The set of hosts a crawl is allowed to treat as its own site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostScope {
    patterns: Vec<String>,
}

impl HostScope {
    /// Creates a scope from allowed-base patterns
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|pattern| pattern.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// Returns true if `host` belongs to the crawled site
    pub fn allows(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        self.patterns
            .iter()
            .any(|pattern| matches_wildcard(pattern, &host))
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}
