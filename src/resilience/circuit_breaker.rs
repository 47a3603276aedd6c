//! Per-host circuit breaker
//!
//! Every coroutine issuing requests shares one `CircuitBreaker`. All host
//! state lives behind a single mutex and is never touched without it.

use crate::config::CircuitBreakerConfig;
use crate::resilience::Backoff;
use crate::state::{Admission, HostState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Which penalty base applies to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Portal listing/detail pages and directory lookups
    Scrape,
    /// Search and other keyed APIs
    Api,
}

/// Classified result of a single request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Timeout, 5xx, connection reset: retried with backoff
    Transient { reason: String, timeout: bool },
    /// 429 / 403: opens the breaker immediately
    Penalizing { reason: String },
}

impl Outcome {
    pub fn timeout() -> Self {
        Self::Transient {
            reason: "timeout".to_string(),
            timeout: true,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Maps an HTTP status code onto a breaker outcome
///
/// Other 4xx codes mean the host answered normally, so they count as
/// success for host health even though the page is unusable.
pub fn classify_status(status: u16) -> Outcome {
    match status {
        429 | 403 => Outcome::Penalizing {
            reason: format!("HTTP {}", status),
        },
        500..=599 => Outcome::Transient {
            reason: format!("HTTP {}", status),
            timeout: false,
        },
        _ => Outcome::Success,
    }
}

/// Penalty policy per request kind
#[derive(Debug, Clone)]
pub struct BreakerPolicy {
    pub scrape: Backoff,
    pub api: Backoff,
    pub timeout_threshold: u32,
}

impl BreakerPolicy {
    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        let max = Duration::from_secs(config.max_penalty_secs);
        Self {
            scrape: Backoff::new(Duration::from_secs(config.scrape_base_penalty_secs), max, u32::MAX),
            api: Backoff::new(Duration::from_secs(config.api_base_penalty_secs), max, u32::MAX),
            timeout_threshold: config.timeout_threshold,
        }
    }

    pub fn backoff(&self, kind: RequestKind) -> &Backoff {
        match kind {
            RequestKind::Scrape => &self.scrape,
            RequestKind::Api => &self.api,
        }
    }
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self::from_config(&CircuitBreakerConfig::default())
    }
}

/// Shared per-host failure and penalty tracker
#[derive(Debug)]
pub struct CircuitBreaker {
    hosts: Mutex<HashMap<String, HostState>>,
    policy: BreakerPolicy,
}

impl CircuitBreaker {
    pub fn new(policy: BreakerPolicy) -> Self {
        Self {
            hosts: Mutex::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> &BreakerPolicy {
        &self.policy
    }

    /// Must be called before every request to `host`
    ///
    /// A `Deferred` answer means the request is not issued at all.
    pub fn admit(&self, host: &str, now: Instant) -> Admission {
        let mut hosts = self.hosts.lock();
        let admission = hosts.entry(host.to_string()).or_default().admit(now);
        if admission == Admission::Trial {
            tracing::info!(host = %host, "Penalty window elapsed, issuing half-open trial");
        }
        admission
    }

    /// Gives back a half-open trial whose outcome will never be recorded
    pub fn release_trial(&self, host: &str) {
        if let Some(state) = self.hosts.lock().get_mut(host) {
            if state.trial_in_flight {
                state.release_trial();
                tracing::debug!(host = %host, "Trial abandoned, slot released");
            }
        }
    }

    /// True while `host` is inside its penalty window (read-only check)
    pub fn is_open(&self, host: &str, now: Instant) -> bool {
        self.hosts
            .lock()
            .get(host)
            .is_some_and(|state| state.is_penalized(now))
    }

    /// Records a request outcome; returns the penalty window if one opened
    pub fn record(&self, host: &str, kind: RequestKind, outcome: &Outcome, now: Instant) -> Option<Duration> {
        let backoff = self.policy.backoff(kind);
        let mut hosts = self.hosts.lock();
        let state = hosts.entry(host.to_string()).or_default();

        match outcome {
            Outcome::Success => {
                let was_trial = state.trial_in_flight;
                state.record_success();
                if was_trial {
                    tracing::info!(host = %host, "Trial succeeded, circuit closed");
                }
                None
            }
            Outcome::Penalizing { reason } => {
                let penalty = state.record_penalizing(reason, backoff, now);
                tracing::warn!(
                    host = %host,
                    failures = state.failures,
                    penalty_secs = penalty.as_secs(),
                    reason = %reason,
                    "Circuit opened"
                );
                Some(penalty)
            }
            Outcome::Transient { reason, timeout } => {
                let penalty = state.record_transient(
                    reason,
                    *timeout,
                    self.policy.timeout_threshold,
                    backoff,
                    now,
                );
                if let Some(p) = penalty {
                    tracing::warn!(
                        host = %host,
                        failures = state.failures,
                        penalty_secs = p.as_secs(),
                        reason = %reason,
                        "Circuit opened after repeated transient failures"
                    );
                }
                penalty
            }
        }
    }

    /// Copy of the state for one host
    pub fn host_state(&self, host: &str) -> Option<HostState> {
        self.hosts.lock().get(host).cloned()
    }

    /// Hosts currently inside a penalty window with time remaining
    pub fn open_hosts(&self, now: Instant) -> Vec<(String, Duration)> {
        let hosts = self.hosts.lock();
        let mut open: Vec<(String, Duration)> = hosts
            .iter()
            .filter_map(|(host, state)| state.remaining_penalty(now).map(|d| (host.clone(), d)))
            .collect();
        open.sort();
        open
    }

    /// Forgets all host state
    pub fn reset(&self) {
        self.hosts.lock().clear();
    }
}

/// Holds a half-open trial slot until the trial's outcome is recorded
///
/// Dropping an armed guard (for instance when the request future is
/// cancelled) releases the slot so the host does not stay deferred.
pub struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    host: String,
    armed: bool,
}

impl<'a> TrialGuard<'a> {
    pub fn new(breaker: &'a CircuitBreaker, host: &str) -> Self {
        Self {
            breaker,
            host: host.to_string(),
            armed: true,
        }
    }

    /// Call once the outcome has been handed to [`CircuitBreaker::record`]
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_trial(&self.host);
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerPolicy::default())
    }
}
