//! State types shared across the pipeline
//!
//! - `HostState`: per-host circuit-breaker bookkeeping
//! - `RunState` / `RunStatus`: the run lifecycle state machine

mod host_state;
mod run_state;

pub use host_state::{Admission, HostState};
pub use run_state::{RunFailure, RunState, RunStatus};
