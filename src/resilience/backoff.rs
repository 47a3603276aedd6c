//! Exponential backoff policy
//!
//! One policy type drives circuit-breaker penalty windows, HTTP retry delays
//! and locked-database write retries, so every retry cycle in the crate is
//! bounded the same way.

use std::time::Duration;

/// Bounded exponential backoff: `min(base * 2^(n-1), max)` for the n-th failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    max_attempts: u32,
}

impl Backoff {
    /// Creates a policy; `max` is raised to `base` if it is smaller
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max: max.max(base),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Total attempts allowed, including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after `failures` consecutive failures (1-based)
    ///
    /// Zero failures means no delay. The result never decreases as
    /// `failures` grows and never exceeds `max`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        2u32.checked_pow(failures - 1)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// True if another attempt is allowed after `attempts_made` attempts
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}
