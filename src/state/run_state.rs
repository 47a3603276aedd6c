/// Run lifecycle states and their allowed transitions
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Status of a scrape run
///
/// ```text
/// idle → starting → running ⇄ paused → stopping → {completed, crashed, killed}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Starting,
    Running,
    Paused,
    Stopping,
    Completed,
    Crashed,
    Killed,
}

impl RunStatus {
    /// Terminal states accept a new `start` (→ starting) or a `reset` (→ idle)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Crashed | Self::Killed)
    }

    /// States in which a crawl task exists
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Running | Self::Paused | Self::Stopping
        )
    }

    /// Returns true if the state machine allows `self → next`
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;
        match (self, next) {
            (Idle, Starting) => true,
            (Starting, Running | Stopping) => true,
            (Running, Paused | Stopping) => true,
            (Paused, Running | Stopping) => true,
            (Stopping, Completed | Crashed | Killed) => true,
            (Completed | Crashed | Killed, Starting | Idle) => true,
            _ => false,
        }
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Completed => "completed",
            Self::Crashed => "crashed",
            Self::Killed => "killed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "starting" => Some(Self::Starting),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "stopping" => Some(Self::Stopping),
            "completed" => Some(Self::Completed),
            "crashed" => Some(Self::Crashed),
            "killed" => Some(Self::Killed),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Error surfaced when a run ends in `crashed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunFailure {
    /// Machine-readable class, e.g. `search_keys_exhausted`
    pub classification: String,
    pub message: String,
}

/// Lifecycle record of the current (or most recent) run
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    pub status: RunStatus,
    pub run_id: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub failure: Option<RunFailure>,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            status: RunStatus::Idle,
            run_id: None,
            started_at: None,
            ended_at: None,
            failure: None,
        }
    }

    /// Applies a transition, returning the previous status
    ///
    /// Rejected transitions leave the state untouched.
    pub fn transition(&mut self, next: RunStatus) -> Result<RunStatus, (RunStatus, RunStatus)> {
        let previous = self.status;
        if !previous.can_transition_to(next) {
            return Err((previous, next));
        }

        match next {
            RunStatus::Starting => {
                self.started_at = Some(Utc::now());
                self.ended_at = None;
                self.failure = None;
                self.run_id = None;
            }
            RunStatus::Idle => {
                self.run_id = None;
                self.started_at = None;
                self.ended_at = None;
                self.failure = None;
            }
            s if s.is_terminal() => self.ended_at = Some(Utc::now()),
            _ => {}
        }

        self.status = next;
        Ok(previous)
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
