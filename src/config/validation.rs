use crate::config::types::{ArchiverConfig, Config, Profile, ProxyMode, ProxySetting};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_archiver_config(&config.archiver)?;

    if config.site.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[site]] profile is required".to_string(),
        ));
    }

    for profile in &config.site {
        validate_profile(profile, &config.archiver)?;
    }

    for (index, profile) in config.site.iter().enumerate() {
        if config.site[..index].contains(profile) {
            return Err(ConfigError::Validation(format!(
                "duplicate site profile for '{}'",
                profile.base_url
            )));
        }
    }

    Ok(())
}

/// Validates process-wide settings
fn validate_archiver_config(config: &ArchiverConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.request_timeout < 1 || config.connect_timeout < 1 {
        return Err(ConfigError::Validation(format!(
            "timeouts must be >= 1s, got request={} connect={}",
            config.request_timeout, config.connect_timeout
        )));
    }

    if config.user_agents.iter().all(|agent| agent.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "user_agents must contain at least one entry".to_string(),
        ));
    }

    Url::parse(&config.connectivity_probe_url).map_err(|e| {
        ConfigError::InvalidUrl(format!(
            "Invalid connectivity_probe_url '{}': {}",
            config.connectivity_probe_url, e
        ))
    })?;

    validate_proxy_url(&config.tor_proxy)?;
    for proxy in &config.proxy_pool {
        validate_proxy_url(proxy)?;
    }

    Ok(())
}

/// Validates one site profile
fn validate_profile(profile: &Profile, archiver: &ArchiverConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&profile.base_url).map_err(|e| {
        ConfigError::InvalidUrl(format!("Invalid base_url '{}': {}", profile.base_url, e))
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "base_url '{}' must use http or https",
            profile.base_url
        )));
    }

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "base_url '{}' has no host",
            profile.base_url
        )));
    }

    if let Some(bases) = &profile.allowed_bases {
        for pattern in bases {
            validate_host_pattern(pattern)?;
        }
    }

    if profile.milestones < 1 {
        return Err(ConfigError::Validation(format!(
            "milestones must be >= 1 for '{}'",
            profile.base_url
        )));
    }

    if profile.reconnect_retries < 1 {
        return Err(ConfigError::Validation(format!(
            "reconnect_retries must be >= 1 for '{}'",
            profile.base_url
        )));
    }

    match &profile.proxies {
        Some(ProxySetting::Explicit(map)) => {
            for (scheme, proxy) in map {
                if !matches!(scheme.as_str(), "http" | "https" | "all") {
                    return Err(ConfigError::Validation(format!(
                        "unknown proxy scheme '{}' for '{}'",
                        scheme, profile.base_url
                    )));
                }
                validate_proxy_url(proxy)?;
            }
        }
        Some(ProxySetting::Mode(ProxyMode::Random)) if archiver.proxy_pool.is_empty() => {
            tracing::warn!(
                "Site {} uses random proxies but proxy_pool is empty; connecting directly",
                profile.base_url
            );
        }
        _ => {}
    }

    Ok(())
}

fn validate_proxy_url(proxy: &str) -> Result<(), ConfigError> {
    Url::parse(proxy)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy URL '{}': {}", proxy, e)))
}

/// Validates a host pattern (supports `*.` wildcards and ports-free hosts)
fn validate_host_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Host pattern cannot be empty".to_string(),
        ));
    }

    let host = pattern.strip_prefix("*.").unwrap_or(pattern);

    if host.is_empty() {
        return Err(ConfigError::InvalidPattern(format!(
            "Host pattern '{}' has no domain",
            pattern
        )));
    }

    if !host
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Host pattern '{}' contains invalid characters",
            pattern
        )));
    }

    if host.starts_with('.') || host.ends_with('.') || host.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Host pattern '{}' has misplaced dots",
            pattern
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(profile: Profile) -> Config {
        Config {
            archiver: ArchiverConfig::default(),
            site: vec![profile],
        }
    }

    #[test]
    fn test_validate_host_pattern() {
        assert!(validate_host_pattern("example.com").is_ok());
        assert!(validate_host_pattern("*.example.com").is_ok());
        assert!(validate_host_pattern("localhost").is_ok());

        assert!(validate_host_pattern("").is_err());
        assert!(validate_host_pattern("*.").is_err());
        assert!(validate_host_pattern(".example.com").is_err());
        assert!(validate_host_pattern("exa mple.com").is_err());
    }

    #[test]
    fn test_rejects_non_http_base() {
        let config = config_with(Profile::new("ftp://ex.test/"));
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_zero_milestones() {
        let mut profile = Profile::new("http://ex.test/");
        profile.milestones = 0;
        assert!(validate(&config_with(profile)).is_err());
    }

    #[test]
    fn test_rejects_unknown_proxy_scheme() {
        let mut profile = Profile::new("http://ex.test/");
        let mut map = std::collections::BTreeMap::new();
        map.insert("gopher".to_string(), "http://10.0.0.1:3128".to_string());
        profile.proxies = Some(ProxySetting::Explicit(map));
        assert!(validate(&config_with(profile)).is_err());
    }

    #[test]
    fn test_random_without_pool_is_allowed() {
        let mut profile = Profile::new("http://ex.test/");
        profile.proxies = Some(ProxySetting::Mode(ProxyMode::Random));
        assert!(validate(&config_with(profile)).is_ok());
    }

    #[test]
    fn test_rejects_duplicate_profiles() {
        let mut config = config_with(Profile::new("http://ex.test/"));
        config.site.push(Profile::new("http://ex.test/"));
        assert!(validate(&config).is_err());
    }
}
