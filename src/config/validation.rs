use crate::config::types::{
    CircuitBreakerConfig, Config, CrawlerConfig, PortalOverride, ScoringConfig, SearchConfig,
    StorageConfig,
};
use crate::ConfigError;
use url::Url;

/// Backend names understood by the search chain
pub const KNOWN_BACKENDS: &[&str] = &["google", "duckduckgo"];

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_breaker_config(&config.circuit_breaker)?;
    validate_search_config(&config.search)?;
    validate_storage_config(&config.storage)?;
    validate_scoring_config(&config.scoring)?;
    validate_portal_overrides(&config.portals)?;
    Ok(())
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_requests < 1 || config.max_concurrent_requests > 256 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_requests must be between 1 and 256, got {}",
            config.max_concurrent_requests
        )));
    }

    if config.max_requests_per_host < 1 {
        return Err(ConfigError::Validation(format!(
            "max_requests_per_host must be >= 1, got {}",
            config.max_requests_per_host
        )));
    }

    if config.max_requests_per_host > config.max_concurrent_requests {
        return Err(ConfigError::Validation(format!(
            "max_requests_per_host ({}) cannot exceed max_concurrent_requests ({})",
            config.max_requests_per_host, config.max_concurrent_requests
        )));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be > 0".to_string(),
        ));
    }

    if config.max_retries == 0 || config.max_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be between 1 and 10, got {}",
            config.max_retries
        )));
    }

    if config.mode != "candidates" && config.mode != "broad" {
        return Err(ConfigError::Validation(format!(
            "mode must be 'candidates' or 'broad', got '{}'",
            config.mode
        )));
    }

    if let Some(window) = &config.date_restrict {
        validate_date_restrict(window)?;
    }

    Ok(())
}

/// Accepts windows of the form `d7`, `w2`, `m6`, `y1`
fn validate_date_restrict(window: &str) -> Result<(), ConfigError> {
    let mut chars = window.chars();
    let unit_ok = matches!(chars.next(), Some('d' | 'w' | 'm' | 'y'));
    let rest = chars.as_str();
    if !unit_ok || rest.is_empty() || !rest.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConfigError::Validation(format!(
            "date_restrict must look like d30, w2, m6 or y1, got '{}'",
            window
        )));
    }
    Ok(())
}

fn validate_breaker_config(config: &CircuitBreakerConfig) -> Result<(), ConfigError> {
    if config.scrape_base_penalty_secs == 0 || config.api_base_penalty_secs == 0 {
        return Err(ConfigError::Validation(
            "circuit breaker base penalties must be > 0".to_string(),
        ));
    }

    let largest_base = config
        .scrape_base_penalty_secs
        .max(config.api_base_penalty_secs);
    if config.max_penalty_secs < largest_base {
        return Err(ConfigError::Validation(format!(
            "max_penalty_secs ({}) must be >= every base penalty ({})",
            config.max_penalty_secs, largest_base
        )));
    }

    if config.timeout_threshold == 0 {
        return Err(ConfigError::Validation(
            "timeout_threshold must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_search_config(config: &SearchConfig) -> Result<(), ConfigError> {
    for backend in &config.backends {
        if !KNOWN_BACKENDS.contains(&backend.as_str()) {
            return Err(ConfigError::Validation(format!(
                "unknown search backend '{}', expected one of {:?}",
                backend, KNOWN_BACKENDS
            )));
        }
    }

    if config.google_api_keys.iter().any(|k| k.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "google_api_keys cannot contain empty keys".to_string(),
        ));
    }

    if !config.google_api_keys.is_empty() && config.google_cx.is_none() {
        return Err(ConfigError::Validation(
            "google_cx is required when google_api_keys are set".to_string(),
        ));
    }

    if config.results_per_query == 0 || config.results_per_query > 10 {
        return Err(ConfigError::Validation(format!(
            "results_per_query must be between 1 and 10, got {}",
            config.results_per_query
        )));
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.lock_retries == 0 {
        return Err(ConfigError::Validation(
            "lock_retries must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_scoring_config(config: &ScoringConfig) -> Result<(), ConfigError> {
    if !config.learned_scale.is_finite() || config.learned_scale < 0.0 {
        return Err(ConfigError::Validation(format!(
            "learned_scale must be a non-negative number, got {}",
            config.learned_scale
        )));
    }

    if config.min_quality_score > 100 {
        return Err(ConfigError::Validation(format!(
            "min_quality_score must be <= 100, got {}",
            config.min_quality_score
        )));
    }

    if let Some(url) = &config.directory_url {
        Url::parse(url).map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", url, e)))?;
    }

    Ok(())
}

fn validate_portal_overrides(portals: &[PortalOverride]) -> Result<(), ConfigError> {
    for portal in portals {
        if portal.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "portal override name cannot be empty".to_string(),
            ));
        }

        if let (Some(min), Some(max)) = (portal.min_delay_ms, portal.max_delay_ms) {
            if min > max {
                return Err(ConfigError::Validation(format!(
                    "portal '{}': min_delay_ms ({}) > max_delay_ms ({})",
                    portal.name, min, max
                )));
            }
        }

        for listing in portal.listing_urls.iter().flatten() {
            let trial = listing.replace("{page}", "1");
            let url = Url::parse(&trial).map_err(|e| {
                ConfigError::InvalidUrl(format!("portal '{}' listing '{}': {}", portal.name, listing, e))
            })?;
            if url.scheme() != "https" && url.scheme() != "http" {
                return Err(ConfigError::InvalidUrl(format!(
                    "portal '{}' listing '{}' must be http(s)",
                    portal.name, listing
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_date_restrict() {
        assert!(validate_date_restrict("d30").is_ok());
        assert!(validate_date_restrict("y1").is_ok());

        assert!(validate_date_restrict("").is_err());
        assert!(validate_date_restrict("d").is_err());
        assert!(validate_date_restrict("x3").is_err());
        assert!(validate_date_restrict("d3x").is_err());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let mut config = Config::with_database("a.db");
        config.search.backends = vec!["altavista".to_string()];
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_keys_require_cx() {
        let mut config = Config::with_database("a.db");
        config.search.google_api_keys = vec!["key".to_string()];
        assert!(validate(&config).is_err());
        config.search.google_cx = Some("cx".to_string());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_per_host_cap_cannot_exceed_global() {
        let mut config = Config::with_database("a.db");
        config.crawler.max_concurrent_requests = 2;
        config.crawler.max_requests_per_host = 3;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_max_penalty_must_cover_base() {
        let mut config = Config::with_database("a.db");
        config.circuit_breaker.max_penalty_secs = 10;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_portal_listing_template_must_be_url() {
        let mut config = Config::with_database("a.db");
        config.portals.push(PortalOverride {
            name: "custom".to_string(),
            enabled: Some(true),
            max_pages: None,
            listing_urls: Some(vec!["not a url {page}".to_string()]),
            min_delay_ms: None,
            max_delay_ms: None,
        });
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl(_))));
    }
}
