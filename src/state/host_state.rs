use crate::resilience::Backoff;
use std::time::{Duration, Instant};

/// Decision for a request about to be issued to a host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Host is healthy, issue the request
    Allowed,
    /// Penalty window elapsed; this request is the single half-open trial
    Trial,
    /// Host is penalized (or a trial is already in flight); do not issue
    Deferred { retry_in: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Deferred { .. })
    }
}

/// Per-host circuit-breaker state
///
/// `failures` only grows until a successful post-penalty trial resets it, so
/// consecutive penalizing failures always yield a window at least as long as
/// the previous one.
#[derive(Debug, Clone, Default)]
pub struct HostState {
    /// Penalizing failures since the last successful trial
    pub failures: u32,

    /// Timeouts in a row, reset by any success
    pub consecutive_timeouts: u32,

    /// End of the current penalty window
    pub penalty_until: Option<Instant>,

    /// Length of the most recent penalty window
    pub current_penalty: Duration,

    /// Reason recorded with the last failure
    pub last_failure: Option<String>,

    /// Whether the half-open trial has been handed out
    pub trial_in_flight: bool,
}

impl HostState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while `now` is inside the penalty window
    pub fn is_penalized(&self, now: Instant) -> bool {
        self.penalty_until.is_some_and(|until| now < until)
    }

    /// Time left in the penalty window, if any
    pub fn remaining_penalty(&self, now: Instant) -> Option<Duration> {
        self.penalty_until
            .filter(|until| now < *until)
            .map(|until| until - now)
    }

    /// Decides whether a request may be issued and hands out the trial
    pub fn admit(&mut self, now: Instant) -> Admission {
        match self.penalty_until {
            None => Admission::Allowed,
            Some(until) if now < until => Admission::Deferred {
                retry_in: until - now,
            },
            Some(_) if self.trial_in_flight => Admission::Deferred {
                retry_in: Duration::ZERO,
            },
            Some(_) => {
                self.trial_in_flight = true;
                Admission::Trial
            }
        }
    }

    /// Records a successful response
    ///
    /// Only the half-open trial closes the breaker; a success that raced a
    /// freshly opened window leaves the penalty untouched.
    pub fn record_success(&mut self) {
        self.consecutive_timeouts = 0;
        if self.trial_in_flight {
            self.failures = 0;
            self.penalty_until = None;
            self.current_penalty = Duration::ZERO;
            self.trial_in_flight = false;
            self.last_failure = None;
        }
    }

    /// Returns an unfinished trial slot so the next caller may try again
    ///
    /// Used when the trial request was cancelled before its outcome was
    /// recorded. Failure counters and the elapsed window are left as they are.
    pub fn release_trial(&mut self) {
        self.trial_in_flight = false;
    }

    /// Records a penalizing failure and returns the new window length
    pub fn record_penalizing(&mut self, reason: &str, backoff: &Backoff, now: Instant) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let penalty = backoff.delay_for(self.failures).max(self.current_penalty);
        let until = now + penalty;
        self.penalty_until = Some(match self.penalty_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
        self.current_penalty = penalty;
        self.trial_in_flight = false;
        self.last_failure = Some(reason.to_string());
        penalty
    }

    /// Records a transient failure
    ///
    /// Escalates to a penalizing failure when timeouts reach
    /// `timeout_threshold` in a row, or when the half-open trial fails.
    /// Returns the penalty window if one was opened.
    pub fn record_transient(
        &mut self,
        reason: &str,
        is_timeout: bool,
        timeout_threshold: u32,
        backoff: &Backoff,
        now: Instant,
    ) -> Option<Duration> {
        if is_timeout {
            self.consecutive_timeouts = self.consecutive_timeouts.saturating_add(1);
        }

        if self.trial_in_flight || (is_timeout && self.consecutive_timeouts >= timeout_threshold) {
            return Some(self.record_penalizing(reason, backoff, now));
        }

        self.last_failure = Some(reason.to_string());
        None
    }
}
