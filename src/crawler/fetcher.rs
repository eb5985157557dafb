//! HTTP fetcher
//!
//! The engine talks to the network only through the `Fetcher` trait:
//! - one GET per call, issued with a given identity (user agent and proxy)
//! - optional TLS verification
//! - transport failures classified into `FetchError`
//! - a connectivity probe used while waiting out an outage

use crate::config::ArchiverConfig;
use crate::state::{Identity, ProxyRoute};
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client, Proxy};
use std::collections::{BTreeMap, HashMap};
use std::error::Error as StdError;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use url::{ParseError, Url};

/// Transport settings shared by every client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpSettings {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_redirects: usize,
}

impl HttpSettings {
    pub fn from_config(config: &ArchiverConfig) -> Self {
        Self {
            request_timeout: Duration::from_secs(config.request_timeout),
            connect_timeout: Duration::from_secs(config.connect_timeout),
            max_redirects: config.max_redirects,
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self::from_config(&ArchiverConfig::default())
    }
}

/// One GET request
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub identity: Identity,
    pub verify_tls: bool,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>, identity: Identity) -> Self {
        Self {
            url: url.into(),
            identity,
            verify_tls: true,
        }
    }

    pub fn with_tls_verification(mut self, verify_tls: bool) -> Self {
        self.verify_tls = verify_tls;
        self
    }
}

/// A completed response, whatever its status
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    /// Lowercased header names
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    /// URL after redirects
    pub final_url: String,
}

impl FetchResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Why a fetch produced no response
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("URL has no scheme: {0}")]
    MissingScheme(String),

    #[error("too many redirects")]
    TooManyRedirects,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("{0}")]
    Other(String),
}

/// Network capability the engine is written against
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Issues one GET request
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;

    /// Returns true if `probe_url` answers at all
    async fn probe_connectivity(&self, probe_url: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    identity: Identity,
    verify_tls: bool,
}

/// `Fetcher` backed by reqwest, with one cached client per identity
pub struct HttpFetcher {
    settings: HttpSettings,
    clients: Mutex<HashMap<ClientKey, Client>>,
}

impl HttpFetcher {
    pub fn new(settings: HttpSettings) -> Self {
        Self {
            settings,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, identity: &Identity, verify_tls: bool) -> Result<Client, FetchError> {
        let key = ClientKey {
            identity: identity.clone(),
            verify_tls,
        };

        let mut clients = self
            .clients
            .lock()
            .map_err(|_| FetchError::Other("HTTP client cache poisoned".to_string()))?;

        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let client = build_http_client(identity, verify_tls, &self.settings)
            .map_err(|e| FetchError::Other(format!("failed to build HTTP client: {}", e)))?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let url = parse_request_url(&request.url)?;
        let client = self.client_for(&request.identity, request.verify_tls)?;

        let response = client.get(url).send().await.map_err(classify_error)?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_lowercase(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(classify_error)?.to_vec();

        Ok(FetchResponse {
            status,
            headers,
            body,
            final_url,
        })
    }

    async fn probe_connectivity(&self, probe_url: &str) -> bool {
        let client = match Client::builder()
            .timeout(self.settings.connect_timeout)
            .connect_timeout(self.settings.connect_timeout)
            .no_proxy()
            .build()
        {
            Ok(client) => client,
            Err(_) => return false,
        };

        client.head(probe_url).send().await.is_ok()
    }
}

/// Builds an HTTP client for one identity
///
/// # Arguments
///
/// * `identity` - User agent and proxy route
/// * `verify_tls` - Whether certificates are verified
/// * `settings` - Timeouts and redirect limit
pub fn build_http_client(
    identity: &Identity,
    verify_tls: bool,
    settings: &HttpSettings,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(identity.user_agent.as_str())
        .timeout(settings.request_timeout)
        .connect_timeout(settings.connect_timeout)
        .redirect(Policy::limited(settings.max_redirects))
        .danger_accept_invalid_certs(!verify_tls)
        .gzip(true)
        .brotli(true);

    match &identity.proxy {
        None => builder = builder.no_proxy(),
        Some(ProxyRoute::All(proxy)) => builder = builder.proxy(Proxy::all(proxy.as_str())?),
        Some(ProxyRoute::PerScheme(routes)) => {
            for (scheme, proxy) in routes {
                let proxy = match scheme.as_str() {
                    "http" => Proxy::http(proxy.as_str())?,
                    "https" => Proxy::https(proxy.as_str())?,
                    _ => Proxy::all(proxy.as_str())?,
                };
                builder = builder.proxy(proxy);
            }
        }
    }

    builder.build()
}

fn parse_request_url(raw: &str) -> Result<Url, FetchError> {
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url),
        Ok(url) => Err(FetchError::InvalidUrl(format!(
            "unsupported scheme '{}' in {}",
            url.scheme(),
            raw
        ))),
        Err(ParseError::RelativeUrlWithoutBase) => Err(FetchError::MissingScheme(raw.to_string())),
        Err(e) => Err(FetchError::InvalidUrl(format!("{}: {}", raw, e))),
    }
}

/// Maps a reqwest error onto the engine's failure classes
fn classify_error(err: reqwest::Error) -> FetchError {
    // The URL itself must not be matched against the TLS keywords
    let err = err.without_url();
    let detail = describe(&err);

    if err.is_timeout() {
        FetchError::Timeout
    } else if err.is_redirect() {
        FetchError::TooManyRedirects
    } else if mentions_tls(&detail) {
        FetchError::Tls(detail)
    } else if err.is_connect() || err.is_request() || err.is_body() || err.is_decode() {
        FetchError::Connection(detail)
    } else if err.is_builder() {
        FetchError::InvalidUrl(detail)
    } else {
        FetchError::Other(detail)
    }
}

/// The error and all its sources, joined
fn describe(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    parts.join(": ")
}

fn mentions_tls(detail: &str) -> bool {
    let detail = detail.to_lowercase();
    ["certificate", "tls", "ssl", "handshake"]
        .iter()
        .any(|needle| detail.contains(needle))
}
