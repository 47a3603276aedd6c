use crate::config::Config;
use crate::http::{FetchError, FetchResult, FetchedPage, UserAgentRotation};
use crate::resilience::{classify_status, Backoff, CircuitBreaker, Outcome, RequestKind, TrialGuard};
use crate::state::Admission;
use crate::url::host_key;
use parking_lot::Mutex;
use reqwest::Client;
use std::collections::HashMap;
use std::error::Error as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use url::Url;

/// Which pooled client a request goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Strict certificate validation
    Secure,
    /// Certificate validation disabled; only used after a TLS failure
    Insecure,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Secure => "secure",
            Self::Insecure => "insecure",
        }
    }
}

/// Settings for the HTTP manager, normally derived from [`Config`]
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub max_concurrent_requests: usize,
    pub max_requests_per_host: usize,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub allow_insecure_tls: bool,
    pub user_agents: Vec<String>,
}

impl HttpSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent_requests: config.crawler.max_concurrent_requests,
            max_requests_per_host: config.crawler.max_requests_per_host,
            request_timeout: Duration::from_secs(config.crawler.request_timeout_secs),
            max_retries: config.crawler.max_retries,
            retry_backoff: Duration::from_millis(config.crawler.retry_backoff_ms),
            allow_insecure_tls: config.http.allow_insecure_tls,
            user_agents: config.http.user_agents.clone(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 8,
            max_requests_per_host: 2,
            request_timeout: Duration::from_secs(20),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
            allow_insecure_tls: false,
            user_agents: Vec::new(),
        }
    }
}

/// Returns true if an error message chain describes a TLS validation failure
pub fn is_tls_failure(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["certificate", "tls", "ssl", "handshake", "unknownissuer"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}

enum Attempt {
    Response(reqwest::Response),
    Failed { error: String, timeout: bool },
}

/// Shared, bounded-concurrency HTTP front end
///
/// Both clients are built once in [`HttpManager::new`]; nothing is created
/// lazily afterwards.
pub struct HttpManager {
    secure: Client,
    insecure: Client,
    settings: HttpSettings,
    breaker: Arc<CircuitBreaker>,
    global: Arc<Semaphore>,
    per_host: Mutex<HashMap<String, Arc<Semaphore>>>,
    user_agents: UserAgentRotation,
    retry: Backoff,
}

impl HttpManager {
    /// Builds both pooled clients and the concurrency limits
    pub fn new(settings: HttpSettings, breaker: Arc<CircuitBreaker>) -> Result<Self, FetchError> {
        let secure = Self::build_client(&settings, false)?;
        let insecure = Self::build_client(&settings, true)?;
        let retry = Backoff::new(
            settings.retry_backoff,
            settings.retry_backoff.saturating_mul(16),
            settings.max_retries,
        );
        Ok(Self {
            secure,
            insecure,
            global: Arc::new(Semaphore::new(settings.max_concurrent_requests.max(1))),
            per_host: Mutex::new(HashMap::new()),
            user_agents: UserAgentRotation::new(&settings.user_agents),
            retry,
            settings,
            breaker,
        })
    }

    fn build_client(settings: &HttpSettings, insecure: bool) -> Result<Client, FetchError> {
        Client::builder()
            .timeout(settings.request_timeout)
            .connect_timeout(settings.request_timeout.min(Duration::from_secs(10)))
            .redirect(reqwest::redirect::Policy::limited(10))
            .gzip(true)
            .brotli(true)
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(FetchError::ClientBuild)
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn settings(&self) -> &HttpSettings {
        &self.settings
    }

    /// Ordered transports tried for one request
    ///
    /// The insecure client is only ever reached when the policy flag is set.
    pub fn transports(&self) -> Vec<Transport> {
        let mut chain = vec![Transport::Secure];
        if self.settings.allow_insecure_tls {
            chain.push(Transport::Insecure);
        }
        chain
    }

    fn client(&self, transport: Transport) -> &Client {
        match transport {
            Transport::Secure => &self.secure,
            Transport::Insecure => &self.insecure,
        }
    }

    async fn acquire(&self, host: &str) -> Option<(OwnedSemaphorePermit, OwnedSemaphorePermit)> {
        let host_sem = {
            let mut map = self.per_host.lock();
            Arc::clone(
                map.entry(host.to_string())
                    .or_insert_with(|| Arc::new(Semaphore::new(self.settings.max_requests_per_host.max(1)))),
            )
        };
        let host_permit = host_sem.acquire_owned().await.ok()?;
        let global_permit = Arc::clone(&self.global).acquire_owned().await.ok()?;
        Some((host_permit, global_permit))
    }

    /// Sends one GET through the transport chain
    async fn send_once(&self, url: &Url) -> Attempt {
        let transports = self.transports();
        let mut last_error = String::new();

        for (i, transport) in transports.iter().enumerate() {
            let request = self
                .client(*transport)
                .get(url.clone())
                .header(reqwest::header::USER_AGENT, self.user_agents.next_agent());

            match request.send().await {
                Ok(response) => return Attempt::Response(response),
                Err(err) => {
                    let chain = error_chain(&err);
                    if err.is_timeout() {
                        return Attempt::Failed {
                            error: "timeout".to_string(),
                            timeout: true,
                        };
                    }
                    if !is_tls_failure(&chain) {
                        return Attempt::Failed {
                            error: chain,
                            timeout: false,
                        };
                    }
                    match transports.get(i + 1) {
                        Some(next) => tracing::warn!(
                            url = %url,
                            from = transport.as_str(),
                            to = next.as_str(),
                            error = %chain,
                            "TLS validation failed, falling back to insecure client"
                        ),
                        None if *transport == Transport::Secure => tracing::warn!(
                            url = %url,
                            error = %chain,
                            "TLS validation failed and insecure fallback is disabled"
                        ),
                        None => {}
                    }
                    last_error = chain;
                }
            }
        }

        Attempt::Failed {
            error: last_error,
            timeout: false,
        }
    }

    /// Fetches `url` with breaker admission, concurrency caps and bounded retries
    ///
    /// A host inside its penalty window yields `FetchResult::Deferred` without
    /// any network call.
    pub async fn fetch(&self, url: &Url, kind: RequestKind) -> FetchResult {
        let Some(host) = host_key(url) else {
            return FetchResult::NetworkError {
                error: FetchError::MissingHost(url.to_string()).to_string(),
                timeout: false,
            };
        };
        self.fetch_with_breaker_key(url, kind, &host).await
    }

    /// Like [`fetch`](Self::fetch), with breaker state tracked under `breaker_key`
    ///
    /// API clients use this to give each credential its own breaker entry
    /// while still sharing the host's concurrency cap.
    pub async fn fetch_with_breaker_key(&self, url: &Url, kind: RequestKind, breaker_key: &str) -> FetchResult {
        let Some(host) = host_key(url) else {
            return FetchResult::NetworkError {
                error: FetchError::MissingHost(url.to_string()).to_string(),
                timeout: false,
            };
        };

        let mut attempts = 0u32;
        loop {
            let trial = match self.breaker.admit(breaker_key, Instant::now()) {
                Admission::Deferred { retry_in } => {
                    tracing::debug!(url = %url, host = %breaker_key, retry_in_secs = retry_in.as_secs(), "Request deferred by circuit breaker");
                    return FetchResult::Deferred {
                        host: breaker_key.to_string(),
                        retry_in,
                    };
                }
                Admission::Trial => Some(TrialGuard::new(&self.breaker, breaker_key)),
                Admission::Allowed => None,
            };

            attempts += 1;
            let Some(permits) = self.acquire(&host).await else {
                return FetchResult::NetworkError {
                    error: "concurrency limiter closed".to_string(),
                    timeout: false,
                };
            };

            let (outcome, result) = match self.send_once(url).await {
                Attempt::Response(response) => self.read_response(response).await,
                Attempt::Failed { error, timeout } => (
                    Outcome::Transient {
                        reason: error.clone(),
                        timeout,
                    },
                    FetchResult::NetworkError { error, timeout },
                ),
            };
            drop(permits);

            self.breaker.record(breaker_key, kind, &outcome, Instant::now());
            if let Some(guard) = trial {
                guard.disarm();
            }

            match outcome {
                Outcome::Transient { reason, .. } if self.retry.should_retry(attempts) => {
                    let delay = self.retry.delay_for(attempts);
                    tracing::debug!(url = %url, attempt = attempts, delay_ms = delay.as_millis() as u64, reason = %reason, "Retrying transient failure");
                    tokio::time::sleep(delay).await;
                }
                _ => return result,
            }
        }
    }

    async fn read_response(&self, response: reqwest::Response) -> (Outcome, FetchResult) {
        let status = response.status().as_u16();
        let outcome = classify_status(status);

        if !response.status().is_success() {
            return (outcome, FetchResult::HttpError { status_code: status });
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        match response.text().await {
            Ok(body) => (
                outcome,
                FetchResult::Success(FetchedPage {
                    final_url,
                    status_code: status,
                    content_type,
                    body,
                }),
            ),
            Err(err) => {
                let timeout = err.is_timeout();
                let error = error_chain(&err);
                (
                    Outcome::Transient {
                        reason: error.clone(),
                        timeout,
                    },
                    FetchResult::NetworkError { error, timeout },
                )
            }
        }
    }

    /// Convenience wrapper returning the body of a successful fetch
    pub async fn get_text(&self, url: &Url, kind: RequestKind) -> Result<FetchedPage, FetchError> {
        self.fetch(url, kind).await.into_page(url.as_str())
    }

    /// Number of hosts that have had a per-host limiter created
    pub fn tracked_hosts(&self) -> usize {
        self.per_host.lock().len()
    }
}
