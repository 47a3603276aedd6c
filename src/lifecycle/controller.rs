//! Control surface for the run state machine
//!
//! All status changes go through [`RunState::transition`] under one mutex,
//! and every accepted change is emitted as a lifecycle event.

use crate::crawler::{Coordinator, CrawlControl};
use crate::lifecycle::{CounterSnapshot, Emitter, EventCategory, EventLevel, LifecycleError, LifecycleResult, LogEvent, RunCounters};
use crate::resilience::CircuitBreaker;
use crate::robots::RobotsGate;
use crate::state::{RunFailure, RunState, RunStatus};
use crate::storage::{with_storage, ResetSummary, SharedStorage, Storage};
use crate::HarvestError;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};

/// Input to [`RunController::start`]
pub struct RunParams {
    /// Fingerprint of the configuration, stored on the run row
    pub config_hash: String,
    /// Fully built coordinator; run id, counters and emitter are set by the controller
    pub coordinator: Coordinator,
}

/// A host currently inside its penalty window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenHost {
    pub host: String,
    pub retry_in_secs: u64,
}

/// Answer to `status()`
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: RunStatus,
    pub run_id: Option<i64>,
    pub pid: u32,
    /// Seconds since the controller was created
    pub uptime_secs: u64,
    /// Seconds since the current run started
    pub run_elapsed_secs: Option<i64>,
    pub counters: CounterSnapshot,
    pub failure: Option<RunFailure>,
    pub open_hosts: Vec<OpenHost>,
}

struct Inner {
    state: RunState,
    counters: Arc<RunCounters>,
    control: Option<CrawlControl>,
    task: Option<JoinHandle<()>>,
    abort: Option<AbortHandle>,
    robots: Option<Arc<RobotsGate>>,
}

/// Owns the run state machine and the crawl task of the current run
#[derive(Clone)]
pub struct RunController {
    storage: SharedStorage,
    breaker: Arc<CircuitBreaker>,
    emitter: Emitter,
    created: Instant,
    inner: Arc<Mutex<Inner>>,
    status_tx: Arc<watch::Sender<RunStatus>>,
}

impl RunController {
    pub fn new(storage: SharedStorage, breaker: Arc<CircuitBreaker>, emitter: Emitter) -> Self {
        let (status_tx, _) = watch::channel(RunStatus::Idle);
        Self {
            status_tx: Arc::new(status_tx),
            storage,
            breaker,
            emitter,
            created: Instant::now(),
            inner: Arc::new(Mutex::new(Inner {
                state: RunState::new(),
                counters: Arc::new(RunCounters::new()),
                control: None,
                task: None,
                abort: None,
                robots: None,
            })),
        }
    }

    /// Starts a new run and returns its id
    ///
    /// Allowed from `idle` and from any terminal state.
    pub async fn start(&self, params: RunParams) -> LifecycleResult<i64> {
        {
            let mut inner = self.inner.lock();
            if inner.state.status.is_active() {
                return Err(LifecycleError::AlreadyActive(inner.state.status));
            }
            self.transition(&mut inner, RunStatus::Starting)?;
            inner.counters = Arc::new(RunCounters::new());
        }

        let hash = params.config_hash.clone();
        let run_id = match with_storage(&self.storage, move |s| s.create_run(&hash)).await {
            Ok(id) => id,
            Err(e) => {
                let mut inner = self.inner.lock();
                inner.state.failure = Some(RunFailure {
                    classification: if e.is_fatal() { "storage_unavailable" } else { "storage" }.to_string(),
                    message: e.to_string(),
                });
                self.wind_down(&mut inner, RunStatus::Crashed)?;
                return Err(e.into());
            }
        };

        let control = CrawlControl::new();
        let counters = {
            let mut inner = self.inner.lock();
            inner.state.run_id = Some(run_id);
            Arc::clone(&inner.counters)
        };
        let coordinator = Arc::new(
            params
                .coordinator
                .with_emitter(self.emitter.clone())
                .with_run_id(run_id)
                .with_counters(Arc::clone(&counters)),
        );

        {
            let mut inner = self.inner.lock();
            inner.robots = Some(Arc::clone(coordinator.robots()));
            inner.control = Some(control.clone());
            self.transition(&mut inner, RunStatus::Running)?;
        }
        if let Err(e) = with_storage(&self.storage, move |s| s.update_run_status(run_id, RunStatus::Running)).await {
            tracing::warn!(run_id, error = %e, "Could not persist run status");
        }

        let token = control.token();
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let result = coordinator.run(token).await;
            this.finish(run_id, result).await;
        });

        let mut inner = self.inner.lock();
        inner.abort = Some(handle.abort_handle());
        inner.task = Some(handle);
        Ok(run_id)
    }

    /// Requests a cooperative stop
    ///
    /// Tasks exit at their next checkpoint; leads already fetched and scored
    /// are still written.
    pub async fn stop(&self) -> LifecycleResult<()> {
        let run_id = {
            let mut inner = self.inner.lock();
            if !matches!(inner.state.status, RunStatus::Running | RunStatus::Paused) {
                return Err(LifecycleError::NotActive("stop"));
            }
            self.transition(&mut inner, RunStatus::Stopping)?;
            if let Some(control) = &inner.control {
                control.stop();
            }
            inner.state.run_id
        };
        if let Some(run_id) = run_id {
            if let Err(e) = with_storage(&self.storage, move |s| s.update_run_status(run_id, RunStatus::Stopping)).await {
                tracing::warn!(run_id, error = %e, "Could not persist run status");
            }
        }
        Ok(())
    }

    /// Stops scheduling new fetches; queued work stays queued
    pub fn pause(&self) -> LifecycleResult<()> {
        let mut inner = self.inner.lock();
        if inner.state.status != RunStatus::Running {
            return Err(LifecycleError::NotActive("pause"));
        }
        self.transition(&mut inner, RunStatus::Paused)?;
        if let Some(control) = &inner.control {
            control.pause();
        }
        Ok(())
    }

    pub fn resume(&self) -> LifecycleResult<()> {
        let mut inner = self.inner.lock();
        if inner.state.status != RunStatus::Paused {
            return Err(LifecycleError::NotActive("resume"));
        }
        self.transition(&mut inner, RunStatus::Running)?;
        if let Some(control) = &inner.control {
            control.resume();
        }
        Ok(())
    }

    /// Aborts the crawl task immediately; nothing in flight is flushed
    pub async fn kill(&self) -> LifecycleResult<()> {
        let (run_id, counters) = {
            let mut inner = self.inner.lock();
            if !inner.state.status.is_active() {
                return Err(LifecycleError::NotActive("kill"));
            }
            self.wind_down(&mut inner, RunStatus::Killed)?;
            if let Some(abort) = inner.abort.take() {
                abort.abort();
            }
            inner.control = None;
            (inner.state.run_id, inner.counters.snapshot())
        };
        if let Some(run_id) = run_id {
            self.persist_finish(run_id, RunStatus::Killed, counters, None).await;
        }
        Ok(())
    }

    /// Clears dedup indices, the directory cache, cached robots.txt rules
    /// and circuit-breaker state, and returns to `idle`
    pub async fn reset(&self, confirm: bool) -> LifecycleResult<ResetSummary> {
        if !confirm {
            return Err(LifecycleError::ResetNotConfirmed);
        }
        let robots = {
            let inner = self.inner.lock();
            if inner.state.status.is_active() {
                return Err(LifecycleError::AlreadyActive(inner.state.status));
            }
            inner.robots.clone()
        };

        let summary = with_storage(&self.storage, |s| s.reset_dedup()).await?;
        if let Some(robots) = robots {
            robots.clear();
        }
        self.breaker.reset();

        {
            let mut inner = self.inner.lock();
            if inner.state.status != RunStatus::Idle {
                self.transition(&mut inner, RunStatus::Idle)?;
            }
            inner.counters = Arc::new(RunCounters::new());
            inner.robots = None;
        }
        self.emitter.emit(
            LogEvent::new(EventLevel::Warn, EventCategory::Lifecycle, "Dedup state reset")
                .with("urls", summary.urls as u64)
                .with("queries", summary.queries as u64)
                .with("directory_entries", summary.directory_entries as u64),
        );
        Ok(summary)
    }

    pub fn status(&self) -> StatusReport {
        let inner = self.inner.lock();
        let now = Instant::now();
        StatusReport {
            status: inner.state.status,
            run_id: inner.state.run_id,
            pid: std::process::id(),
            uptime_secs: self.created.elapsed().as_secs(),
            run_elapsed_secs: inner
                .state
                .started_at
                .map(|start| (inner.state.ended_at.unwrap_or_else(Utc::now) - start).num_seconds()),
            counters: inner.counters.snapshot(),
            failure: inner.state.failure.clone(),
            open_hosts: self
                .breaker
                .open_hosts(now)
                .into_iter()
                .map(|(host, remaining)| OpenHost {
                    host,
                    retry_in_secs: remaining.as_secs(),
                })
                .collect(),
        }
    }

    /// Waits until no run is active, then for the crawl task to wind down
    ///
    /// Returns the final status. Cancelling this future before the run ends
    /// leaves the task untouched.
    pub async fn wait(&self) -> RunStatus {
        let mut rx = self.status_tx.subscribe();
        loop {
            let status = *rx.borrow_and_update();
            if !status.is_active() || rx.changed().await.is_err() {
                break;
            }
        }

        let task = self.inner.lock().task.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::error!(error = %e, "Crawl task panicked");
                }
            }
        }
        self.inner.lock().state.status
    }

    /// Moves the run to its terminal state once the coordinator returns
    async fn finish(&self, run_id: i64, result: Result<CounterSnapshot, HarvestError>) {
        let (status, counters, failure) = {
            let mut inner = self.inner.lock();
            if inner.state.run_id != Some(run_id) || !inner.state.status.is_active() {
                return;
            }

            let status = match &result {
                Ok(_) => RunStatus::Completed,
                Err(e) => {
                    inner.state.failure = Some(RunFailure {
                        classification: e.classification().to_string(),
                        message: e.to_string(),
                    });
                    RunStatus::Crashed
                }
            };
            if let Err(e) = self.wind_down(&mut inner, status) {
                tracing::error!(run_id, error = %e, "Could not finish run");
                return;
            }
            inner.control = None;
            inner.abort = None;
            (status, inner.counters.snapshot(), inner.state.failure.clone())
        };

        self.persist_finish(run_id, status, counters, failure).await;
    }

    async fn persist_finish(&self, run_id: i64, status: RunStatus, counters: CounterSnapshot, failure: Option<RunFailure>) {
        let result = with_storage(&self.storage, move |s| {
            s.finish_run(run_id, status, &counters, failure.as_ref())
        })
        .await;
        if let Err(e) = result {
            self.emitter.emit(
                LogEvent::new(EventLevel::Error, EventCategory::Db, "Could not record run result")
                    .with("run_id", run_id)
                    .with("error", e.to_string()),
            );
        }
    }

    /// Enters `terminal` by way of `stopping`
    fn wind_down(&self, inner: &mut Inner, terminal: RunStatus) -> LifecycleResult<()> {
        if inner.state.status != RunStatus::Stopping {
            self.transition(inner, RunStatus::Stopping)?;
        }
        self.transition(inner, terminal)
    }

    fn transition(&self, inner: &mut Inner, next: RunStatus) -> LifecycleResult<()> {
        let previous = inner.state.transition(next)?;
        self.status_tx.send_replace(next);
        let level = match next {
            RunStatus::Crashed => EventLevel::Critical,
            RunStatus::Killed => EventLevel::Warn,
            _ => EventLevel::Info,
        };
        let mut event = LogEvent::new(level, EventCategory::Lifecycle, format!("Run {}", next))
            .with("from", previous.to_db_string())
            .with("to", next.to_db_string())
            .with_run(inner.state.run_id);
        if let Some(failure) = inner.state.failure.as_ref().filter(|_| next == RunStatus::Crashed) {
            event = event
                .with("classification", failure.classification.as_str())
                .with("error", failure.message.as_str());
        }
        self.emitter.emit(event);
        Ok(())
    }
}
