//! Lead-Harvest: a resilient multi-portal lead acquisition pipeline
//!
//! This crate crawls classified-ad portals and search backends, extracts and
//! classifies contact data, scores and enriches it, and persists de-duplicated
//! leads into a local SQLite store that tolerates concurrent writers.

pub mod config;
pub mod crawler;
pub mod extract;
pub mod http;
pub mod lead;
pub mod lifecycle;
pub mod output;
pub mod resilience;
pub mod robots;
pub mod scoring;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Lead-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] http::FetchError),

    #[error("Search error: {0}")]
    Search(#[from] crawler::SearchError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] lifecycle::LifecycleError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarvestError {
    /// Returns true for conditions that must move a run to `crashed`
    ///
    /// Only exhausted search credentials and a persistence layer that stays
    /// unavailable after retries qualify. Everything else is logged and the
    /// run continues.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Search(e) => e.is_fatal(),
            Self::Storage(e) => e.is_fatal(),
            _ => false,
        }
    }

    /// Short machine-readable classification surfaced through `status()`
    pub fn classification(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Storage(e) if e.is_fatal() => "storage_unavailable",
            Self::Storage(_) => "storage",
            Self::Fetch(_) | Self::Reqwest(_) => "network",
            Self::Search(e) if e.is_fatal() => "search_keys_exhausted",
            Self::Search(_) => "search",
            Self::Lifecycle(_) => "lifecycle",
            Self::UrlError(_) | Self::UrlParse(_) => "url",
            Self::Io(_) => "io",
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Lead-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use lead::{Lead, LeadType};
pub use lifecycle::{RunController, StatusReport};
pub use state::{HostState, RunStatus};
pub use url::{extract_domain, normalize_url};
