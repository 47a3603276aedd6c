//! Replays unsynced local leads into an external store

use crate::storage::{with_storage, ExternalStore, SharedStorage, Storage, StorageResult};
use serde::Serialize;

/// Checkpoint name used when none is given
pub const DEFAULT_CHECKPOINT: &str = "external_store";

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Leads handed to the external store
    pub attempted: usize,
    pub synced: usize,
    /// Checkpoint value after the pass
    pub checkpoint: i64,
    /// Set when a write failed and the pass stopped at that lead
    pub stopped_at: Option<i64>,
}

/// Replays unsynced leads above the checkpoint, in id order
///
/// The checkpoint advances in the same transaction that flags each lead as
/// synced, so an interrupted pass resumes exactly after the last confirmed
/// row. The pass stops at the first failed write; the failed lead stays
/// unsynced and above the checkpoint, and is retried by the next pass.
///
/// # Arguments
///
/// * `storage` - Local store holding the unsynced rows
/// * `external` - Target store
/// * `checkpoint` - Name of the persisted checkpoint
/// * `batch_size` - Rows loaded per query
pub async fn reconcile_unsynced(
    storage: &SharedStorage,
    external: &dyn ExternalStore,
    checkpoint: &str,
    batch_size: usize,
) -> StorageResult<ReconcileReport> {
    let name = checkpoint.to_string();
    let mut last_id = with_storage(storage, move |s| s.get_checkpoint(&name)).await?;
    let mut report = ReconcileReport {
        checkpoint: last_id,
        ..ReconcileReport::default()
    };

    tracing::info!(
        store = external.name(),
        checkpoint = last_id,
        "Starting reconciliation"
    );

    loop {
        let after = last_id;
        let limit = batch_size.max(1);
        let batch = with_storage(storage, move |s| s.unsynced_leads(after, limit)).await?;
        if batch.is_empty() {
            break;
        }

        for lead in batch {
            let Some(lead_id) = lead.id else {
                continue;
            };
            report.attempted += 1;

            match external.write_lead(&lead).await {
                Ok(external_id) => {
                    let name = checkpoint.to_string();
                    with_storage(storage, move |s| s.mark_synced(lead_id, &external_id, &name)).await?;
                    last_id = lead_id;
                    report.synced += 1;
                    report.checkpoint = lead_id;
                }
                Err(e) => {
                    tracing::warn!(
                        store = external.name(),
                        lead_id,
                        error = %e,
                        "Reconciliation stopped at failed write"
                    );
                    report.stopped_at = Some(lead_id);
                    return Ok(report);
                }
            }
        }
    }

    tracing::info!(
        synced = report.synced,
        checkpoint = report.checkpoint,
        "Reconciliation finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lead::Lead;
    use crate::storage::external::test_support::FakeExternalStore;
    use crate::storage::SqliteStorage;

    fn seed(storage: &SharedStorage, count: usize) {
        let mut s = storage.lock();
        for i in 0..count {
            let mut lead = Lead::new(format!("https://portal.de/a/{}", i));
            lead.email = Some(format!("lead{}@example.com", i));
            s.upsert_lead(&lead).unwrap();
        }
    }

    #[tokio::test]
    async fn test_reconcile_syncs_everything() {
        let storage = SqliteStorage::new_in_memory().unwrap().into_shared();
        seed(&storage, 5);
        let external = FakeExternalStore::online();

        let report = reconcile_unsynced(&storage, &external, DEFAULT_CHECKPOINT, 2)
            .await
            .unwrap();

        assert_eq!(report.synced, 5);
        assert_eq!(report.stopped_at, None);
        assert_eq!(storage.lock().count_unsynced().unwrap(), 0);
        assert_eq!(external.rows.lock().len(), 5);
    }

    #[tokio::test]
    async fn test_rerun_does_not_replay() {
        let storage = SqliteStorage::new_in_memory().unwrap().into_shared();
        seed(&storage, 3);
        let external = FakeExternalStore::online();

        reconcile_unsynced(&storage, &external, DEFAULT_CHECKPOINT, 10).await.unwrap();
        let second = reconcile_unsynced(&storage, &external, DEFAULT_CHECKPOINT, 10)
            .await
            .unwrap();

        assert_eq!(second.attempted, 0);
        assert_eq!(*external.writes.lock(), 3);
    }

    #[tokio::test]
    async fn test_resumes_after_outage() {
        let storage = SqliteStorage::new_in_memory().unwrap().into_shared();
        seed(&storage, 3);
        let external = FakeExternalStore::default();

        let failed = reconcile_unsynced(&storage, &external, DEFAULT_CHECKPOINT, 10)
            .await
            .unwrap();
        assert_eq!(failed.synced, 0);
        assert!(failed.stopped_at.is_some());
        assert_eq!(storage.lock().get_checkpoint(DEFAULT_CHECKPOINT).unwrap(), 0);

        *external.available.lock() = true;
        let resumed = reconcile_unsynced(&storage, &external, DEFAULT_CHECKPOINT, 10)
            .await
            .unwrap();
        assert_eq!(resumed.synced, 3);
        assert_eq!(external.rows.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_merged_update_is_replayed_once() {
        let storage = SqliteStorage::new_in_memory().unwrap().into_shared();
        seed(&storage, 3);
        let external = FakeExternalStore::online();
        reconcile_unsynced(&storage, &external, DEFAULT_CHECKPOINT, 10).await.unwrap();
        assert_eq!(*external.writes.lock(), 3);

        let mut update = Lead::new("https://portal.de/a/0");
        update.email = Some("lead0@example.com".to_string());
        update.name = Some("Max Mustermann".to_string());
        storage.lock().upsert_lead(&update).unwrap();

        let replay = reconcile_unsynced(&storage, &external, DEFAULT_CHECKPOINT, 10)
            .await
            .unwrap();
        assert_eq!(replay.attempted, 1);
        assert_eq!(replay.synced, 1);
        assert_eq!(*external.writes.lock(), 4);
        let rows = external.rows.lock();
        assert_eq!(rows["lead0@example.com"].name.as_deref(), Some("Max Mustermann"));
        drop(rows);

        let again = reconcile_unsynced(&storage, &external, DEFAULT_CHECKPOINT, 10)
            .await
            .unwrap();
        assert_eq!(again.attempted, 0);
        assert_eq!(storage.lock().count_unsynced().unwrap(), 0);
    }
}
