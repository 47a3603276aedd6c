//! Storage module for persisting leads and crawl bookkeeping
//!
//! This module handles all database operations, including:
//! - SQLite initialization in WAL mode and schema management
//! - Lead upserts keyed by normalized email, then phone
//! - `urls_seen` / `queries_done` dedup indices
//! - Directory cache, feedback and learned adjustments
//! - The external-store fallback chain and reconciliation

mod external;
mod reconcile;
mod retry;
mod schema;
mod sqlite;
mod traits;

pub use external::{ExternalResult, ExternalStore, ExternalStoreError, LeadWriter, WriteReport, WriteTarget, WrittenTo};
pub use reconcile::{reconcile_unsynced, ReconcileReport, DEFAULT_CHECKPOINT};
pub use retry::{is_lock_error, with_write_retry};
pub use schema::{initialize_schema, SCHEMA_VERSION};
pub use sqlite::{with_storage, SharedStorage, SqliteStorage};
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::RunStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Result of a lead upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(i64),
    /// Existing row improved by the incoming record
    Updated(i64),
    /// Existing row already at least as good
    Unchanged(i64),
}

impl UpsertOutcome {
    pub fn id(&self) -> i64 {
        match self {
            Self::Inserted(id) | Self::Updated(id) | Self::Unchanged(id) => *id,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Represents a scrape run
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub links_checked: u64,
    pub leads_accepted: u64,
    pub error_class: Option<String>,
    pub error_message: Option<String>,
}

/// A cached phone-directory lookup
///
/// `found == false` records a miss so the lookup is not repeated.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry {
    /// E.164 phone number
    pub subject: String,
    pub found: bool,
    pub listed_name: Option<String>,
    pub listed_address: Option<String>,
    pub source: String,
    pub looked_up_at: DateTime<Utc>,
}

/// Rows removed by a destructive reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResetSummary {
    pub urls: usize,
    pub queries: usize,
    pub directory_entries: usize,
}
