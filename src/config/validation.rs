use crate::config::types::{
    Config, FrontierConfig, NormalizerConfig, OutputConfig, PolitenessConfig, SourceConfig,
    UserAgentConfig, WorkerConfig,
};
use crate::frontier::{MAX_PRIORITY, MIN_PRIORITY};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_frontier_config(&config.frontier)?;
    validate_politeness_config(&config.politeness)?;
    validate_worker_config(&config.worker)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    validate_normalizer_config(&config.normalizer)?;
    if config.adaptive.max_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "adaptive max_interval_secs must be >= 1".to_string(),
        ));
    }
    validate_sources(&config.source)?;
    Ok(())
}

fn validate_frontier_config(config: &FrontierConfig) -> Result<(), ConfigError> {
    if config.lease_secs < 1 {
        return Err(ConfigError::Validation(
            "lease_secs must be >= 1".to_string(),
        ));
    }

    if config.backoff_base_secs < 1 {
        return Err(ConfigError::Validation(
            "backoff_base_secs must be >= 1".to_string(),
        ));
    }

    if config.backoff_cap_secs < config.backoff_base_secs {
        return Err(ConfigError::Validation(format!(
            "backoff_cap_secs ({}) must be >= backoff_base_secs ({})",
            config.backoff_cap_secs, config.backoff_base_secs
        )));
    }

    if config.reap_interval_secs < 1 {
        return Err(ConfigError::Validation(
            "reap_interval_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_politeness_config(config: &PolitenessConfig) -> Result<(), ConfigError> {
    if config.floor_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "floor_ms must be >= 100ms, got {}ms",
            config.floor_ms
        )));
    }

    if config.robots_ttl_secs < 60 {
        return Err(ConfigError::Validation(format!(
            "robots_ttl_secs must be >= 60, got {}",
            config.robots_ttl_secs
        )));
    }

    Ok(())
}

fn validate_worker_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    if config.count < 1 || config.count > 100 {
        return Err(ConfigError::Validation(format!(
            "worker count must be between 1 and 100, got {}",
            config.count
        )));
    }

    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.connect_timeout_secs < 1 || config.connect_timeout_secs > config.timeout_secs {
        return Err(ConfigError::Validation(format!(
            "connect_timeout_secs must be between 1 and timeout_secs ({}), got {}",
            config.timeout_secs, config.connect_timeout_secs
        )));
    }

    if config.max_body_bytes < 1024 {
        return Err(ConfigError::Validation(format!(
            "max_body_bytes must be >= 1024, got {}",
            config.max_body_bytes
        )));
    }

    if config.poll_every_secs < 1 {
        return Err(ConfigError::Validation(
            "poll_every_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if matches!(config.summary_path.as_deref(), Some("")) {
        return Err(ConfigError::Validation(
            "summary_path cannot be empty when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_normalizer_config(config: &NormalizerConfig) -> Result<(), ConfigError> {
    if let Some(param) = config
        .extra_tracking_params
        .iter()
        .find(|p| p.is_empty() || p.contains(['&', '=']))
    {
        return Err(ConfigError::Validation(format!(
            "Invalid tracking parameter name '{}'",
            param
        )));
    }
    Ok(())
}

/// Validates source entries
fn validate_sources(sources: &[SourceConfig]) -> Result<(), ConfigError> {
    let mut ids = HashSet::new();

    for source in sources {
        if source.id.is_empty() {
            return Err(ConfigError::Validation(
                "Source id cannot be empty".to_string(),
            ));
        }

        if !ids.insert(source.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate source id '{}'",
                source.id
            )));
        }

        if source.feed_url.is_none() && source.base_url.is_none() {
            return Err(ConfigError::Validation(format!(
                "Source '{}' needs a feed-url or a base-url",
                source.id
            )));
        }
        if let Some(feed_url) = &source.feed_url {
            validate_http_url("Feed", feed_url)?;
        }
        if let Some(base_url) = &source.base_url {
            validate_http_url("Base", base_url)?;
        }

        if source.poll_interval_secs < 60 {
            return Err(ConfigError::Validation(format!(
                "Source '{}' poll_interval_secs must be >= 60, got {}",
                source.id, source.poll_interval_secs
            )));
        }

        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&source.base_priority) {
            return Err(ConfigError::Validation(format!(
                "Source '{}' base_priority must be between {} and {}, got {}",
                source.id, MIN_PRIORITY, MAX_PRIORITY, source.base_priority
            )));
        }
    }

    Ok(())
}

fn validate_http_url(label: &str, raw: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} URL '{}': {}", label, raw, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "{} URL '{}' must use HTTP or HTTPS",
            label, raw
        )));
    }
    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    // Domain part should contain at least one dot
    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(id: &str) -> SourceConfig {
        SourceConfig {
            id: id.to_string(),
            name: None,
            feed_url: Some("https://example.com/feed.xml".to_string()),
            base_url: None,
            poll_interval_secs: 1800,
            adaptive: false,
            rate_limit_ms: None,
            base_priority: 5,
            strip_trailing_slash: true,
        }
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("admin@sub.example.com").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("invalid").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("user@").is_err());
        assert!(validate_email("user@domain").is_err());
        assert!(validate_email("a@b@example.com").is_err());
    }

    #[test]
    fn test_validate_sources() {
        assert!(validate_sources(&[source("a"), source("b")]).is_ok());
        assert!(validate_sources(&[source("a"), source("a")]).is_err());
        assert!(validate_sources(&[source("")]).is_err());

        let mut bad_url = source("a");
        bad_url.feed_url = Some("ftp://example.com/feed".to_string());
        assert!(validate_sources(&[bad_url]).is_err());

        let mut base_only = source("a");
        base_only.feed_url = None;
        base_only.base_url = Some("https://example.com/".to_string());
        assert!(validate_sources(&[base_only.clone()]).is_ok());

        base_only.base_url = None;
        assert!(validate_sources(&[base_only]).is_err());

        let mut bad_priority = source("a");
        bad_priority.base_priority = 11;
        assert!(validate_sources(&[bad_priority]).is_err());

        let mut too_fast = source("a");
        too_fast.poll_interval_secs = 10;
        assert!(validate_sources(&[too_fast]).is_err());
    }

    #[test]
    fn test_validate_worker_config() {
        assert!(validate_worker_config(&WorkerConfig::default()).is_ok());

        let zero = WorkerConfig {
            count: 0,
            ..WorkerConfig::default()
        };
        assert!(validate_worker_config(&zero).is_err());

        let slow_connect = WorkerConfig {
            connect_timeout_secs: 60,
            timeout_secs: 30,
            ..WorkerConfig::default()
        };
        assert!(validate_worker_config(&slow_connect).is_err());
    }

    #[test]
    fn test_validate_frontier_config() {
        assert!(validate_frontier_config(&FrontierConfig::default()).is_ok());

        let inverted = FrontierConfig {
            backoff_base_secs: 600,
            backoff_cap_secs: 60,
            ..FrontierConfig::default()
        };
        assert!(validate_frontier_config(&inverted).is_err());
    }
}
