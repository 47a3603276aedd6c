//! Storage trait and error types

use crate::lead::{Lead, LeadType};
use crate::lifecycle::CounterSnapshot;
use crate::scoring::{AdjustmentSnapshot, Feedback, RecomputeSummary};
use crate::state::{RunFailure, RunStatus};
use crate::storage::{DirectoryEntry, ResetSummary, RunRecord, UpsertOutcome};
use rusqlite::ErrorCode;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Database still locked after {attempts} attempts")]
    Locked { attempts: u32 },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Lead from {0} has neither email nor phone")]
    MissingContact(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Maps errors that mean the database cannot be used at all to `Unavailable`
    pub fn classify(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(
                ErrorCode::CannotOpen
                | ErrorCode::ReadOnly
                | ErrorCode::DiskFull
                | ErrorCode::SystemIoFailure
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::PermissionDenied,
            ) => Self::Unavailable(err.to_string()),
            _ => Self::Sqlite(err),
        }
    }

    /// Only a permanently unavailable store ends a run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Operations the pipeline needs from a lead store
///
/// Every write goes through the lock-aware retry wrapper.
pub trait Storage {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    /// Writes final status, counters and failure classification
    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        counters: &CounterSnapshot,
        failure: Option<&RunFailure>,
    ) -> StorageResult<()>;

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    fn list_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>>;

    // ===== Leads =====

    /// Inserts a lead or merges it into the row sharing its email or phone
    ///
    /// Existing fields are only replaced by strictly better data: a null
    /// field gains a value, a score rises, a tag set grows.
    fn upsert_lead(&mut self, lead: &Lead) -> StorageResult<UpsertOutcome>;

    /// Like `upsert_lead`, and records that the row exists externally
    fn upsert_lead_synced(&mut self, lead: &Lead, external_id: &str) -> StorageResult<UpsertOutcome>;

    fn get_lead(&self, id: i64) -> StorageResult<Option<Lead>>;

    fn find_lead_by_email(&self, email: &str) -> StorageResult<Option<Lead>>;

    fn find_lead_by_phone(&self, phone: &str) -> StorageResult<Option<Lead>>;

    fn count_leads(&self) -> StorageResult<u64>;

    fn count_leads_by_type(&self) -> StorageResult<HashMap<LeadType, u64>>;

    // ===== Dedup Indices =====

    /// Records a detail URL; returns false if it was already present
    fn mark_url_seen(&mut self, url: &str, run_id: Option<i64>) -> StorageResult<bool>;

    fn is_url_seen(&self, url: &str) -> StorageResult<bool>;

    /// Records a search query; returns false if it was already present
    fn mark_query_done(&mut self, query: &str, run_id: Option<i64>, result_count: usize) -> StorageResult<bool>;

    fn is_query_done(&self, query: &str) -> StorageResult<bool>;

    /// Clears `urls_seen`, `queries_done` and `directory_cache`
    fn reset_dedup(&mut self) -> StorageResult<ResetSummary>;

    // ===== Directory Cache =====

    fn get_directory_entry(&self, subject: &str) -> StorageResult<Option<DirectoryEntry>>;

    fn put_directory_entry(&mut self, entry: &DirectoryEntry) -> StorageResult<()>;

    // ===== Learning =====

    fn record_feedback(&mut self, feedback: &Feedback) -> StorageResult<i64>;

    fn load_adjustments(&self) -> StorageResult<AdjustmentSnapshot>;

    /// Folds pending feedback into `score_adjustments` in one transaction
    fn recompute_adjustments(&mut self) -> StorageResult<RecomputeSummary>;

    // ===== External Sync =====

    /// Unsynced leads with id above `after_id`, in id order
    fn unsynced_leads(&self, after_id: i64, limit: usize) -> StorageResult<Vec<Lead>>;

    /// Flags a lead as synced and advances the named checkpoint atomically
    fn mark_synced(&mut self, lead_id: i64, external_id: &str, checkpoint: &str) -> StorageResult<()>;

    fn get_checkpoint(&self, name: &str) -> StorageResult<i64>;

    fn set_checkpoint(&mut self, name: &str, last_id: i64) -> StorageResult<()>;

    fn count_unsynced(&self) -> StorageResult<u64>;
}
