//! Run lifecycle, control surface and observability
//!
//! - `controller`: start/stop/pause/resume/kill/reset and `status()`
//! - `events`: the structured event schema consumed by log aggregation
//! - `metrics`: live per-run counters

mod controller;
mod events;
mod metrics;

pub use controller::{OpenHost, RunController, RunParams, StatusReport};
pub use events::{Emitter, EventCategory, EventLevel, EventSink, LogEvent, MemorySink, TracingSink};
pub use metrics::{CounterSnapshot, RunCounters};

use crate::state::RunStatus;
use crate::storage::StorageError;
use thiserror::Error;

/// Errors from control-surface commands
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Invalid run state transition {from} -> {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("A run is already active ({0})")]
    AlreadyActive(RunStatus),

    #[error("No active run to {0}")]
    NotActive(&'static str),

    #[error("Reset is destructive and requires explicit confirmation")]
    ResetNotConfirmed,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<(RunStatus, RunStatus)> for LifecycleError {
    fn from((from, to): (RunStatus, RunStatus)) -> Self {
        Self::InvalidTransition { from, to }
    }
}

/// Result type for control-surface commands
pub type LifecycleResult<T> = Result<T, LifecycleError>;
