use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Main configuration structure for the archiver
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub archiver: ArchiverConfig,
    #[serde(default)]
    pub site: Vec<Profile>,
}

impl Config {
    /// Finds the profile whose base URL matches `base_url`
    pub fn profile_for(&self, base_url: &str) -> Option<&Profile> {
        let wanted = canonical_url(base_url);
        self.site
            .iter()
            .find(|profile| profile.seed_url() == wanted)
    }
}

/// Process-wide settings shared by every site worker
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiverConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Per-request timeout (seconds)
    #[serde(rename = "request-timeout", default = "default_request_timeout")]
    pub request_timeout: u64,

    /// TCP/TLS connect timeout (seconds)
    #[serde(rename = "connect-timeout", default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Maximum redirect hops before a fetch counts as a redirect loop
    #[serde(rename = "max-redirects", default = "default_max_redirects")]
    pub max_redirects: usize,

    /// URL probed while waiting for connectivity to come back
    #[serde(
        rename = "connectivity-probe-url",
        default = "default_connectivity_probe_url"
    )]
    pub connectivity_probe_url: String,

    /// User agents cycled through on identity rotation
    #[serde(rename = "user-agents", default = "default_user_agents")]
    pub user_agents: Vec<String>,

    /// Proxy URLs drawn from when a site uses `proxies = "random"`
    #[serde(rename = "proxy-pool", default)]
    pub proxy_pool: Vec<String>,

    /// SOCKS endpoint used when a site uses `proxies = "torsocks"`
    #[serde(rename = "tor-proxy", default = "default_tor_proxy")]
    pub tor_proxy: String,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            database_path: "archive.db".to_string(),
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            max_redirects: default_max_redirects(),
            connectivity_probe_url: default_connectivity_probe_url(),
            user_agents: default_user_agents(),
            proxy_pool: Vec::new(),
            tor_proxy: default_tor_proxy(),
        }
    }
}

/// A crawl profile for one website
///
/// The profile is persisted with every run; two profiles describe the same
/// run only when they are deep-equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Hosts considered part of the site (`*.domain` wildcards allowed)
    #[serde(rename = "allowed-bases", default, skip_serializing_if = "Option::is_none")]
    pub allowed_bases: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxies: Option<ProxySetting>,

    /// Pages between periodic checkpoints
    #[serde(default = "default_milestones")]
    pub milestones: u64,

    /// Seconds between connectivity probes during an outage
    #[serde(rename = "reconnect-interval", default = "default_reconnect_interval")]
    pub reconnect_interval: u64,

    /// Connectivity probes attempted before giving up on a URL
    #[serde(rename = "reconnect-retries", default = "default_reconnect_retries")]
    pub reconnect_retries: u32,
}

impl Profile {
    /// Creates a profile with default settings for `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            allowed_bases: None,
            proxies: None,
            milestones: default_milestones(),
            reconnect_interval: default_reconnect_interval(),
            reconnect_retries: default_reconnect_retries(),
        }
    }

    /// The base URL in the serialized form used for Page rows
    pub fn seed_url(&self) -> String {
        canonical_url(&self.base_url)
    }

    /// Host of the base URL, lowercased
    pub fn base_host(&self) -> Option<String> {
        url::Url::parse(&self.base_url)
            .ok()
            .and_then(|url| url.host_str().map(|host| host.to_lowercase()))
    }

    /// Allowed host patterns, defaulting to the base URL's host
    pub fn allowed_hosts(&self) -> Vec<String> {
        match &self.allowed_bases {
            Some(bases) if !bases.is_empty() => {
                bases.iter().map(|base| base.to_lowercase()).collect()
            }
            _ => self.base_host().into_iter().collect(),
        }
    }
}

/// How a site's requests are routed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProxySetting {
    Mode(ProxyMode),
    /// Scheme (`http`, `https`, `all`) to proxy URL
    Explicit(BTreeMap<String, String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// Draw a proxy from the pool, switching on identity rotation
    Random,
    /// Route through the local Tor SOCKS endpoint
    Torsocks,
}

fn canonical_url(raw: &str) -> String {
    url::Url::parse(raw)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_redirects() -> usize {
    10
}

fn default_connectivity_probe_url() -> String {
    "https://www.google.com".to_string()
}

fn default_user_agents() -> Vec<String> {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15".to_string(),
        "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0".to_string(),
    ]
}

fn default_tor_proxy() -> String {
    "socks5h://127.0.0.1:9050".to_string()
}

fn default_milestones() -> u64 {
    500
}

fn default_reconnect_interval() -> u64 {
    10
}

fn default_reconnect_retries() -> u32 {
    30
}
