use crate::config::{ArchiverConfig, Profile, ProxyMode, ProxySetting};
use serde::{Deserialize, Serialize};

/// Used only when the configuration provides no user agent at all
const FALLBACK_USER_AGENT: &str = concat!("web-archiver/", env!("CARGO_PKG_VERSION"));

/// Position in the user-agent list and proxy pool
///
/// Persisted in checkpoints so a resumed run keeps the identity it had.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityCursor {
    pub user_agent: usize,
    pub proxy: usize,
    pub rotations: u64,
}

/// Where requests are sent through
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProxyRoute {
    /// One proxy for every scheme
    All(String),
    /// Scheme (`http`, `https`, `all`) to proxy URL
    PerScheme(Vec<(String, String)>),
}

/// The user agent and proxy a request is issued with
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub user_agent: String,
    pub proxy: Option<ProxyRoute>,
}

#[derive(Debug, Clone)]
enum Routing {
    Direct,
    Pool(Vec<String>),
    Fixed(ProxyRoute),
}

/// Cycles through user agents (and pool proxies) to get past blocking
#[derive(Debug, Clone)]
pub struct IdentityRotation {
    user_agents: Vec<String>,
    routing: Routing,
    cursor: IdentityCursor,
}

impl IdentityRotation {
    /// Creates the rotation for a site, resuming at `cursor`
    pub fn new(archiver: &ArchiverConfig, profile: &Profile, cursor: IdentityCursor) -> Self {
        let mut user_agents: Vec<String> = archiver
            .user_agents
            .iter()
            .map(|agent| agent.trim().to_string())
            .filter(|agent| !agent.is_empty())
            .collect();
        if user_agents.is_empty() {
            user_agents.push(FALLBACK_USER_AGENT.to_string());
        }

        let routing = match &profile.proxies {
            None => Routing::Direct,
            Some(ProxySetting::Mode(ProxyMode::Random)) if archiver.proxy_pool.is_empty() => {
                Routing::Direct
            }
            Some(ProxySetting::Mode(ProxyMode::Random)) => {
                Routing::Pool(archiver.proxy_pool.clone())
            }
            Some(ProxySetting::Mode(ProxyMode::Torsocks)) => {
                Routing::Fixed(ProxyRoute::All(archiver.tor_proxy.clone()))
            }
            Some(ProxySetting::Explicit(map)) => Routing::Fixed(ProxyRoute::PerScheme(
                map.iter()
                    .map(|(scheme, proxy)| (scheme.clone(), proxy.clone()))
                    .collect(),
            )),
        };

        Self {
            user_agents,
            routing,
            cursor,
        }
    }

    /// The identity requests are currently issued with
    pub fn current(&self) -> Identity {
        let user_agent = self.user_agents[self.cursor.user_agent % self.user_agents.len()].clone();

        let proxy = match &self.routing {
            Routing::Direct => None,
            Routing::Pool(pool) => Some(ProxyRoute::All(
                pool[self.cursor.proxy % pool.len()].clone(),
            )),
            Routing::Fixed(route) => Some(route.clone()),
        };

        Identity { user_agent, proxy }
    }

    /// Switches to the next user agent and, for pooled proxies, the next proxy
    pub fn rotate(&mut self) -> Identity {
        self.cursor.user_agent = (self.cursor.user_agent + 1) % self.user_agents.len();
        if let Routing::Pool(pool) = &self.routing {
            self.cursor.proxy = (self.cursor.proxy + 1) % pool.len();
        }
        self.cursor.rotations += 1;
        self.current()
    }

    pub fn cursor(&self) -> IdentityCursor {
        self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn archiver() -> ArchiverConfig {
        ArchiverConfig {
            user_agents: vec!["agent-a".to_string(), "agent-b".to_string()],
            proxy_pool: vec![
                "http://10.0.0.1:3128".to_string(),
                "http://10.0.0.2:3128".to_string(),
                "http://10.0.0.3:3128".to_string(),
            ],
            ..ArchiverConfig::default()
        }
    }

    #[test]
    fn test_direct_rotation_cycles_user_agents() {
        let mut rotation = IdentityRotation::new(
            &archiver(),
            &Profile::new("http://ex.test/"),
            IdentityCursor::default(),
        );

        assert_eq!(rotation.current().user_agent, "agent-a");
        assert_eq!(rotation.current().proxy, None);
        assert_eq!(rotation.rotate().user_agent, "agent-b");
        assert_eq!(rotation.rotate().user_agent, "agent-a");
        assert_eq!(rotation.cursor().rotations, 2);
    }

    #[test]
    fn test_random_mode_draws_from_pool() {
        let mut profile = Profile::new("http://ex.test/");
        profile.proxies = Some(ProxySetting::Mode(ProxyMode::Random));
        let mut rotation = IdentityRotation::new(&archiver(), &profile, IdentityCursor::default());

        assert_eq!(
            rotation.current().proxy,
            Some(ProxyRoute::All("http://10.0.0.1:3128".to_string()))
        );
        assert_eq!(
            rotation.rotate().proxy,
            Some(ProxyRoute::All("http://10.0.0.2:3128".to_string()))
        );
    }

    #[test]
    fn test_random_mode_without_pool_is_direct() {
        let mut profile = Profile::new("http://ex.test/");
        profile.proxies = Some(ProxySetting::Mode(ProxyMode::Random));
        let config = ArchiverConfig {
            proxy_pool: Vec::new(),
            ..archiver()
        };
        let mut rotation = IdentityRotation::new(&config, &profile, IdentityCursor::default());
        assert_eq!(rotation.rotate().proxy, None);
    }

    #[test]
    fn test_torsocks_and_explicit_routes_are_fixed() {
        let mut profile = Profile::new("http://ex.test/");
        profile.proxies = Some(ProxySetting::Mode(ProxyMode::Torsocks));
        let mut rotation = IdentityRotation::new(&archiver(), &profile, IdentityCursor::default());
        let expected = Some(ProxyRoute::All("socks5h://127.0.0.1:9050".to_string()));
        assert_eq!(rotation.current().proxy, expected);
        assert_eq!(rotation.rotate().proxy, expected);

        let mut map = BTreeMap::new();
        map.insert("https".to_string(), "http://10.9.9.9:8080".to_string());
        profile.proxies = Some(ProxySetting::Explicit(map));
        let rotation = IdentityRotation::new(&archiver(), &profile, IdentityCursor::default());
        assert_eq!(
            rotation.current().proxy,
            Some(ProxyRoute::PerScheme(vec![(
                "https".to_string(),
                "http://10.9.9.9:8080".to_string()
            )]))
        );
    }

    #[test]
    fn test_resumes_from_cursor() {
        let mut profile = Profile::new("http://ex.test/");
        profile.proxies = Some(ProxySetting::Mode(ProxyMode::Random));
        let cursor = IdentityCursor {
            user_agent: 1,
            proxy: 2,
            rotations: 5,
        };
        let rotation = IdentityRotation::new(&archiver(), &profile, cursor);
        let identity = rotation.current();
        assert_eq!(identity.user_agent, "agent-b");
        assert_eq!(
            identity.proxy,
            Some(ProxyRoute::All("http://10.0.0.3:3128".to_string()))
        );
    }

    #[test]
    fn test_empty_user_agents_fall_back() {
        let config = ArchiverConfig {
            user_agents: vec!["  ".to_string()],
            ..ArchiverConfig::default()
        };
        let mut rotation = IdentityRotation::new(
            &config,
            &Profile::new("http://ex.test/"),
            IdentityCursor::default(),
        );
        assert!(rotation.rotate().user_agent.starts_with("web-archiver/"));
    }
}
