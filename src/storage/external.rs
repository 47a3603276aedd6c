//! External lead store adapter with local fallback

use crate::lead::Lead;
use crate::storage::{with_storage, SharedStorage, Storage, StorageResult, UpsertOutcome};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by an external store
#[derive(Debug, Error)]
pub enum ExternalStoreError {
    #[error("External store unavailable: {0}")]
    Unavailable(String),

    #[error("External store rejected lead: {0}")]
    Rejected(String),

    #[error("External store timed out")]
    Timeout,
}

/// Result type for external store operations
pub type ExternalResult<T> = Result<T, ExternalStoreError>;

/// A "write lead" capability backed by some other system (e.g. a CRM database)
#[async_trait]
pub trait ExternalStore: Send + Sync {
    fn name(&self) -> &str;

    /// Writes the lead and returns its identifier in the external system
    ///
    /// Implementations must treat a repeated write of the same lead as an
    /// update, so replays cannot create duplicates.
    async fn write_lead(&self, lead: &Lead) -> ExternalResult<String>;
}

/// One step of the write chain
#[derive(Clone)]
pub enum WriteTarget {
    External(Arc<dyn ExternalStore>),
    Local,
}

impl WriteTarget {
    pub fn label(&self) -> &str {
        match self {
            Self::External(store) => store.name(),
            Self::Local => "local",
        }
    }
}

/// Where a lead ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WrittenTo {
    External { store: String, external_id: String },
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub written_to: WrittenTo,
    /// Outcome of the local upsert, which happens in every case
    pub outcome: UpsertOutcome,
}

/// Persists leads through an ordered chain of targets
///
/// External targets are tried in order; the first success marks the local
/// row as synced. Any external failure is logged at debug level and the next
/// target is tried. The chain always ends with the local store, so a lead is
/// never lost because the external side is down.
pub struct LeadWriter {
    storage: SharedStorage,
    chain: Vec<WriteTarget>,
}

impl LeadWriter {
    /// A writer that only uses the local store
    pub fn local(storage: SharedStorage) -> Self {
        Self {
            storage,
            chain: vec![WriteTarget::Local],
        }
    }

    /// Places `store` ahead of the local store in the chain
    pub fn with_external(mut self, store: Arc<dyn ExternalStore>) -> Self {
        let position = self.chain.len().saturating_sub(1);
        self.chain.insert(position, WriteTarget::External(store));
        self
    }

    pub fn chain(&self) -> &[WriteTarget] {
        &self.chain
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    /// Writes a lead through the chain
    ///
    /// Only a local storage failure is returned as an error.
    pub async fn write(&self, lead: &Lead) -> StorageResult<WriteReport> {
        for target in &self.chain {
            match target {
                WriteTarget::External(store) => match store.write_lead(lead).await {
                    Ok(external_id) => {
                        let outcome = self.write_local(lead, Some(external_id.clone())).await?;
                        return Ok(WriteReport {
                            written_to: WrittenTo::External {
                                store: store.name().to_string(),
                                external_id,
                            },
                            outcome,
                        });
                    }
                    Err(e) => {
                        tracing::debug!(
                            store = store.name(),
                            url = %lead.source_url,
                            error = %e,
                            "External write failed, falling back"
                        );
                    }
                },
                WriteTarget::Local => {
                    let outcome = self.write_local(lead, None).await?;
                    return Ok(WriteReport {
                        written_to: WrittenTo::Local,
                        outcome,
                    });
                }
            }
        }
        // `with_external` never removes the trailing local target
        let outcome = self.write_local(lead, None).await?;
        Ok(WriteReport {
            written_to: WrittenTo::Local,
            outcome,
        })
    }

    async fn write_local(&self, lead: &Lead, external_id: Option<String>) -> StorageResult<UpsertOutcome> {
        let lead = lead.clone();
        with_storage(&self.storage, move |storage| match external_id {
            Some(id) => storage.upsert_lead_synced(&lead, &id),
            None => storage.upsert_lead(&lead),
        })
        .await
    }
}
