use crate::{UrlError, UrlResult};
use std::collections::BTreeMap;
use url::Url;

/// Schemes the archiver follows
const SUPPORTED_SCHEMES: &[&str] = &["http", "https"];

/// Scheme used when neither the reference nor the cache knows one
const DEFAULT_SCHEME: &str = "https";

/// Resolves discovered references into absolute URLs
///
/// The normalizer keeps a per-host scheme cache: every absolute URL it sees
/// records which scheme that host was reached over, so partial references
/// (`//host/path`, `host/path`) can be completed later. The cache is part of
/// the resumable crawl state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlNormalizer {
    schemes: BTreeMap<String, String>,
}

/// A reference split into its optional scheme, optional host and the rest
struct Reference<'a> {
    scheme: Option<&'a str>,
    host: Option<&'a str>,
}

impl UrlNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a normalizer from a checkpointed scheme cache
    pub fn from_cache(schemes: BTreeMap<String, String>) -> Self {
        Self { schemes }
    }

    pub fn cache(&self) -> &BTreeMap<String, String> {
        &self.schemes
    }

    /// Last scheme seen for `host`
    pub fn scheme_for(&self, host: &str) -> Option<&str> {
        self.schemes.get(&host.to_lowercase()).map(String::as_str)
    }

    /// Records the scheme of an absolute URL; anything else is ignored
    pub fn remember(&mut self, url: &str) {
        if let Ok(parsed) = Url::parse(url) {
            if let Some(host) = parsed.host_str() {
                if SUPPORTED_SCHEMES.contains(&parsed.scheme()) {
                    self.schemes
                        .insert(host.to_lowercase(), parsed.scheme().to_string());
                }
            }
        }
    }

    /// Resolves `candidate` against `base_url`
    ///
    /// # Arguments
    ///
    /// * `base_url` - URL of the page the reference was found on
    /// * `candidate` - Raw attribute value
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - Absolute http(s) URL without fragment
    /// * `Err(UrlError)` - Unsupported scheme or unparseable reference
    pub fn fix(&mut self, base_url: &str, candidate: &str) -> UrlResult<String> {
        let candidate = clean(candidate);
        if candidate.is_empty() || candidate.starts_with('#') {
            return Err(UrlError::Malformed(format!(
                "empty reference '{}'",
                candidate
            )));
        }

        let base = clean(base_url);
        let base_parts = split_reference(&base);
        let candidate_parts = split_reference(&candidate);

        if let Some(scheme) = candidate_parts.scheme {
            check_scheme(scheme)?;
            let url = parse(&candidate)?;
            self.remember(url.as_str());
            return Ok(finish(url));
        }

        // Base scheme wins; the cache covers bases stored without one.
        let base_host = base_parts
            .host
            .or_else(|| leading_segment(&base))
            .map(str::to_lowercase);
        if let (Some(scheme), Some(host)) = (base_parts.scheme, &base_host) {
            if SUPPORTED_SCHEMES.contains(&scheme.to_lowercase().as_str()) {
                self.schemes.insert(host.clone(), scheme.to_lowercase());
            }
        }

        if let Some(host) = candidate_parts.host {
            let scheme = match base_parts.scheme {
                Some(scheme) => scheme.to_lowercase(),
                None => self.cached_or_default(host),
            };
            let url = parse(&format!("{}:{}", scheme, candidate))?;
            return Ok(finish(url));
        }

        let base_url = self.absolute_base(&base, &base_parts, base_host.as_deref())?;
        let joined = base_url
            .join(&candidate)
            .map_err(|e| UrlError::Parse(format!("{}: {}", candidate, e)))?;
        check_scheme(joined.scheme())?;
        Ok(finish(joined))
    }

    /// Adds a scheme to a URL that lacks one, using the cache for its host
    pub fn repair(&self, url: &str) -> UrlResult<String> {
        let url = clean(url);
        let parts = split_reference(&url);

        if parts.scheme.is_some() {
            return Ok(finish(parse(&url)?));
        }

        let host = parts
            .host
            .or_else(|| leading_segment(&url))
            .ok_or_else(|| UrlError::MissingHost(url.clone()))?;
        let scheme = self.cached_or_default(host);

        let repaired = if url.starts_with("//") {
            format!("{}:{}", scheme, url)
        } else {
            format!("{}://{}", scheme, url)
        };
        Ok(finish(parse(&repaired)?))
    }

    fn cached_or_default(&self, host: &str) -> String {
        self.scheme_for(host)
            .unwrap_or(DEFAULT_SCHEME)
            .to_string()
    }

    fn absolute_base(
        &self,
        base: &str,
        parts: &Reference<'_>,
        host: Option<&str>,
    ) -> UrlResult<Url> {
        if parts.scheme.is_some() {
            return parse(base);
        }

        let host = host.ok_or_else(|| UrlError::MissingHost(base.to_string()))?;
        let scheme = self.cached_or_default(host);
        let absolute = if base.starts_with("//") {
            format!("{}:{}", scheme, base)
        } else {
            format!("{}://{}", scheme, base)
        };
        parse(&absolute)
    }
}

fn clean(raw: &str) -> String {
    raw.trim().replace('\\', "")
}

fn parse(raw: &str) -> UrlResult<Url> {
    let url = Url::parse(raw).map_err(|e| UrlError::Parse(format!("{}: {}", raw, e)))?;
    if url.host_str().is_none() {
        return Err(UrlError::MissingHost(raw.to_string()));
    }
    Ok(url)
}

fn check_scheme(scheme: &str) -> UrlResult<()> {
    if SUPPORTED_SCHEMES.contains(&scheme.to_lowercase().as_str()) {
        Ok(())
    } else {
        Err(UrlError::InvalidScheme(scheme.to_string()))
    }
}

fn finish(mut url: Url) -> String {
    url.set_fragment(None);
    url.to_string()
}

/// First path segment of a scheme-less, host-less string (`ex.test/a` -> `ex.test`)
fn leading_segment(raw: &str) -> Option<&str> {
    let segment = raw
        .split(|c| c == '/' || c == '?' || c == '#')
        .next()
        .filter(|segment| !segment.is_empty())?;
    segment.contains('.').then_some(segment)
}

/// Splits a reference the way a generic URI parser would, without resolving it
fn split_reference(raw: &str) -> Reference<'_> {
    let mut rest = raw;
    let mut scheme = None;

    if let Some(colon) = raw.find(':') {
        let prefix = &raw[..colon];
        let before_delimiter = !prefix.contains(|c| c == '/' || c == '?' || c == '#');
        let valid = prefix
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic())
            .unwrap_or(false)
            && prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.');
        if before_delimiter && valid {
            scheme = Some(prefix);
            rest = &raw[colon + 1..];
        }
    }

    let host = rest.strip_prefix("//").map(|authority| {
        let end = authority
            .find(|c| c == '/' || c == '?' || c == '#')
            .unwrap_or(authority.len());
        let authority = &authority[..end];
        let authority = authority.rsplit('@').next().unwrap_or(authority);
        authority.split(':').next().unwrap_or(authority)
    });

    Reference {
        scheme,
        host: host.filter(|host| !host.is_empty()),
    }
}
