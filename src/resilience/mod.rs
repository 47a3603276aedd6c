//! Retry and circuit-breaker primitives
//!
//! `Backoff` is the single exponential policy used by every bounded retry
//! cycle; `CircuitBreaker` tracks per-host penalties on top of it.

mod backoff;
mod circuit_breaker;

pub use backoff::Backoff;
pub use circuit_breaker::{classify_status, BreakerPolicy, CircuitBreaker, Outcome, RequestKind, TrialGuard};
