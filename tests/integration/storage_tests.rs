//! Storage behaviour with real database files
//!
//! These tests open several connections to one SQLite file so that lock
//! contention, merging across writers and checkpointed replays are exercised
//! the way a crawler, the learner thread and an importer would hit them.

use async_trait::async_trait;
use lead_harvest::config::StorageConfig;
use lead_harvest::lead::{Lead, LeadType};
use lead_harvest::scoring::{recompute_once, AdjustmentSnapshot, AdjustmentStore, Feedback, LearningWorker, Scorer};
use lead_harvest::storage::{
    reconcile_unsynced, ExternalResult, ExternalStore, ExternalStoreError, SqliteStorage, Storage, StorageError,
    DEFAULT_CHECKPOINT,
};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("leads.db")
}

fn config_for(path: &Path, lock_retries: u32, lock_backoff_ms: u64) -> StorageConfig {
    StorageConfig {
        database_path: path.to_string_lossy().into_owned(),
        lock_retries,
        lock_backoff_ms,
    }
}

fn lead(email: Option<&str>, phone: Option<&str>) -> Lead {
    let mut lead = Lead::new("https://portal.example/s-stellengesuche/anzeige/1");
    lead.email = email.map(str::to_string);
    lead.phone = phone.map(str::to_string);
    lead.lead_type = LeadType::Candidate;
    lead
}

/// Holds an immediate transaction on `path` for `hold`, signalling once it is held
fn hold_write_lock(path: &Path, hold: Duration) -> (thread::JoinHandle<()>, mpsc::Receiver<()>) {
    let path = path.to_path_buf();
    let (locked_tx, locked_rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let conn = Connection::open(&path).expect("Failed to open blocker connection");
        conn.execute_batch("BEGIN IMMEDIATE").expect("Failed to take write lock");
        locked_tx.send(()).expect("Test thread gone");
        thread::sleep(hold);
        conn.execute_batch("COMMIT").expect("Failed to release write lock");
    });
    (handle, locked_rx)
}

#[test]
fn test_write_succeeds_after_lock_is_released() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    let mut storage = SqliteStorage::open(&config_for(&path, 8, 20)).unwrap();

    let (blocker, locked) = hold_write_lock(&path, Duration::from_millis(150));
    locked.recv().unwrap();

    let started = Instant::now();
    let outcome = storage
        .upsert_lead(&lead(Some("anna@example.com"), None))
        .expect("Write should succeed once the lock is released");
    blocker.join().unwrap();

    assert!(outcome.is_insert());
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(storage.count_leads().unwrap(), 1);
}

#[test]
fn test_lock_held_past_retries_is_not_fatal() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    let mut storage = SqliteStorage::open(&config_for(&path, 2, 10)).unwrap();

    let (blocker, locked) = hold_write_lock(&path, Duration::from_millis(500));
    locked.recv().unwrap();

    let err = storage.upsert_lead(&lead(Some("anna@example.com"), None)).unwrap_err();
    blocker.join().unwrap();

    assert!(matches!(err, StorageError::Locked { attempts: 2 }));
    assert!(!err.is_fatal());

    // The same write goes through once the lock is gone
    assert!(storage.upsert_lead(&lead(Some("anna@example.com"), None)).is_ok());
}

#[test]
fn test_unopenable_database_is_fatal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing").join("nested").join("leads.db");

    let err = match SqliteStorage::open(&config_for(&path, 1, 10)) {
        Ok(_) => panic!("Opening a database in a missing directory should fail"),
        Err(e) => e,
    };
    assert!(matches!(err, StorageError::Unavailable(_)));
    assert!(err.is_fatal());
}

#[test]
fn test_concurrent_writers_produce_one_row() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    // Creates the schema before the writers start
    SqliteStorage::open(&config_for(&path, 8, 5)).unwrap();

    let writers = 4;
    let barrier = Arc::new(Barrier::new(writers));
    let handles: Vec<_> = (0..writers)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            let config = config_for(&path, 10, 5);
            thread::spawn(move || {
                let mut storage = SqliteStorage::open(&config).unwrap();
                let mut l = lead(Some("shared@example.com"), None);
                l.quality_score = 40 + i as u8 * 10;
                barrier.wait();
                storage.upsert_lead(&l).unwrap()
            })
        })
        .collect();

    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let inserts = outcomes.iter().filter(|o| o.is_insert()).count();
    assert_eq!(inserts, 1);
    assert!(outcomes.iter().all(|o| o.id() == outcomes[0].id()));

    let storage = SqliteStorage::new(&path).unwrap();
    assert_eq!(storage.count_leads().unwrap(), 1);
    let stored = storage.find_lead_by_email("shared@example.com").unwrap().unwrap();
    // Scores only ever rise, whatever order the writers ran in
    assert_eq!(stored.quality_score, 70);
}

#[test]
fn test_portal_and_search_records_merge_into_one_lead() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);

    {
        let mut crawler = SqliteStorage::new(&path).unwrap();
        let mut from_portal = lead(Some("jonas.becker@example.com"), None);
        from_portal.source_portal = Some("kleinanzeigen".to_string());
        from_portal.quality_score = 35;
        crawler.upsert_lead(&from_portal).unwrap();
    }

    let mut importer = SqliteStorage::new(&path).unwrap();
    let mut from_search = lead(Some("jonas.becker@example.com"), Some("+4917623456789"));
    from_search.name = Some("Jonas Becker".to_string());
    from_search.source_query = Some("vertrieb stellengesuch".to_string());
    from_search.quality_score = 60;
    from_search.add_tag("directory_verified");
    let outcome = importer.upsert_lead(&from_search).unwrap();
    assert!(!outcome.is_insert());

    let reopened = SqliteStorage::new(&path).unwrap();
    assert_eq!(reopened.count_leads().unwrap(), 1);
    let merged = reopened
        .find_lead_by_phone("+4917623456789")
        .unwrap()
        .expect("Merged lead should be reachable by phone");
    assert_eq!(merged.email.as_deref(), Some("jonas.becker@example.com"));
    assert_eq!(merged.name.as_deref(), Some("Jonas Becker"));
    assert_eq!(merged.source_portal.as_deref(), Some("kleinanzeigen"));
    assert_eq!(merged.quality_score, 60);
    assert!(merged.has_tag("directory_verified"));
}

#[test]
fn test_feedback_changes_scores_after_recompute() {
    let dir = TempDir::new().unwrap();
    let mut storage = SqliteStorage::new(&db_path(&dir)).unwrap();
    let store = Arc::new(AdjustmentStore::new(AdjustmentSnapshot::default()));
    let scorer = Scorer::new(Arc::clone(&store), 20.0);

    let mut l = lead(Some("kim@example.com"), None);
    l.source_portal = Some("markt".to_string());
    scorer.score(&mut l);
    let before = l.quality_score;
    let id = storage.upsert_lead(&l).unwrap().id();

    for _ in 0..6 {
        storage.record_feedback(&Feedback::rating(id, 5)).unwrap();
    }
    let summary = recompute_once(&mut storage, &store).unwrap();
    assert_eq!(summary.feedback_processed, 6);
    assert_eq!(store.version(), 1);

    let mut rescored = lead(Some("kim@example.com"), None);
    rescored.source_portal = Some("markt".to_string());
    let breakdown = scorer.score(&mut rescored);
    assert_eq!(breakdown.version, 1);
    assert!(breakdown.learned > 0.0);
    assert!(rescored.quality_score > before);
}

#[test]
fn test_learning_worker_publishes_alongside_writer() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    let mut writer = SqliteStorage::new(&path).unwrap();

    let id = writer.upsert_lead(&lead(Some("ole@example.com"), None)).unwrap().id();
    writer.record_feedback(&Feedback::conversion(id, true)).unwrap();

    let store = Arc::new(AdjustmentStore::new(AdjustmentSnapshot::default()));
    let worker = LearningWorker::spawn(config_for(&path, 8, 10), Duration::from_secs(60), Arc::clone(&store)).unwrap();

    // The writer keeps going while the first recomputation runs
    writer.upsert_lead(&lead(Some("pia@example.com"), None)).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while store.version() < 1 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    worker.shutdown();

    assert_eq!(store.version(), 1);
    assert!(store.snapshot().get("email_domain:example.com").is_some());
    assert_eq!(writer.count_leads().unwrap(), 2);
}

/// External store that fails once at a chosen write
#[derive(Default)]
struct FlakyStore {
    fail_on_write: Mutex<Option<usize>>,
    writes: Mutex<usize>,
    stored: Mutex<Vec<String>>,
}

#[async_trait]
impl ExternalStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn write_lead(&self, lead: &Lead) -> ExternalResult<String> {
        let attempt = {
            let mut writes = self.writes.lock();
            *writes += 1;
            *writes
        };
        let mut fail_on = self.fail_on_write.lock();
        if *fail_on == Some(attempt) {
            *fail_on = None;
            return Err(ExternalStoreError::Timeout);
        }
        let email = lead
            .email
            .clone()
            .ok_or_else(|| ExternalStoreError::Rejected("no email".to_string()))?;
        self.stored.lock().push(email.clone());
        Ok(format!("crm-{}", email))
    }
}

#[tokio::test]
async fn test_reconciliation_resumes_after_failure() {
    let dir = TempDir::new().unwrap();
    let storage = SqliteStorage::new(&db_path(&dir)).unwrap().into_shared();
    {
        let mut s = storage.lock();
        for i in 0..5 {
            let email = format!("lead{}@example.com", i);
            s.upsert_lead(&lead(Some(email.as_str()), None)).unwrap();
        }
    }

    let external = FlakyStore::default();
    *external.fail_on_write.lock() = Some(3);

    let first = reconcile_unsynced(&storage, &external, DEFAULT_CHECKPOINT, 2).await.unwrap();
    assert_eq!(first.synced, 2);
    assert!(first.stopped_at.is_some());
    assert_eq!(storage.lock().count_unsynced().unwrap(), 3);

    let second = reconcile_unsynced(&storage, &external, DEFAULT_CHECKPOINT, 2).await.unwrap();
    assert_eq!(second.synced, 3);
    assert_eq!(second.stopped_at, None);
    assert_eq!(storage.lock().count_unsynced().unwrap(), 0);

    // Every lead reached the external store exactly once
    let mut stored = external.stored.lock().clone();
    stored.sort();
    stored.dedup();
    assert_eq!(stored.len(), 5);
    assert_eq!(external.stored.lock().len(), 5);
}
