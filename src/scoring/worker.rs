//! Background recomputation of learned adjustments
//!
//! Runs on its own OS thread with its own SQLite connection, so a slow
//! recomputation never blocks the crawl's storage handle. WAL mode lets the
//! crawler keep reading while the worker's transaction is open.

use crate::config::StorageConfig;
use crate::scoring::{AdjustmentStore, RecomputeSummary};
use crate::storage::{SqliteStorage, Storage, StorageResult};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Folds pending feedback and publishes the resulting snapshot
///
/// Publication is skipped when nothing changed and the store is current.
pub fn recompute_once(storage: &mut SqliteStorage, store: &AdjustmentStore) -> StorageResult<RecomputeSummary> {
    let summary = storage.recompute_adjustments()?;
    if summary.keys_updated > 0 || store.version() < summary.version {
        let snapshot = storage.load_adjustments()?;
        let version = snapshot.version;
        if store.publish(snapshot) {
            tracing::info!(
                version,
                keys = summary.keys_updated,
                feedback = summary.feedback_processed,
                "Published score adjustments"
            );
        }
    }
    Ok(summary)
}

/// Handle to the learner thread; dropping it stops the thread
pub struct LearningWorker {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl LearningWorker {
    /// Opens a dedicated connection and starts the periodic loop
    ///
    /// The first recomputation runs immediately.
    pub fn spawn(config: StorageConfig, interval: Duration, store: Arc<AdjustmentStore>) -> StorageResult<Self> {
        let mut storage = SqliteStorage::open(&config)?;
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("score-learner".to_string())
            .spawn(move || loop {
                if let Err(e) = recompute_once(&mut storage, &store) {
                    tracing::warn!(error = %e, "Score adjustment recomputation failed");
                }
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        tracing::debug!(interval_secs = interval.as_secs(), "Learning worker started");
        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Signals the thread and waits for the current pass to finish
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Learning worker panicked");
            }
        }
    }
}

impl Drop for LearningWorker {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
