//! HTTP client manager
//!
//! All outbound requests go through [`HttpManager`], which enforces the
//! circuit breaker, the global and per-host concurrency caps, user-agent
//! rotation, bounded retries and the secure→insecure TLS fallback policy.

mod client;
mod user_agents;

pub use client::{is_tls_failure, HttpManager, HttpSettings, Transport};
pub use user_agents::{UserAgentRotation, DEFAULT_USER_AGENTS};

use std::time::Duration;
use thiserror::Error;

/// A successfully fetched response body
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub final_url: String,
    pub status_code: u16,
    pub content_type: String,
    pub body: String,
}

/// Result of a fetch operation
#[derive(Debug)]
pub enum FetchResult {
    /// 2xx response
    Success(FetchedPage),

    /// The host is in its penalty window; no request was issued
    Deferred {
        host: String,
        retry_in: Duration,
    },

    /// Non-success HTTP status after retries were exhausted or not applicable
    HttpError { status_code: u16 },

    /// Transport failure (timeout, reset, TLS) after retries were exhausted
    NetworkError { error: String, timeout: bool },
}

impl FetchResult {
    /// Converts into the page or a `FetchError` naming `url`
    pub fn into_page(self, url: &str) -> Result<FetchedPage, FetchError> {
        match self {
            Self::Success(page) => Ok(page),
            Self::Deferred { host, retry_in } => Err(FetchError::Deferred { host, retry_in }),
            Self::HttpError { status_code } => Err(FetchError::Status {
                url: url.to_string(),
                status: status_code,
            }),
            Self::NetworkError { error, .. } => Err(FetchError::Network {
                url: url.to_string(),
                message: error,
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// HTTP-layer errors
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("Host {host} is penalized for another {}s", retry_in.as_secs())]
    Deferred { host: String, retry_in: Duration },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("URL has no host: {0}")]
    MissingHost(String),
}
