//! SQLite storage implementation

use crate::config::StorageConfig;
use crate::lead::{clamp_score, Lead, LeadType};
use crate::lifecycle::CounterSnapshot;
use crate::resilience::Backoff;
use crate::scoring::{adjustment_keys, Adjustment, AdjustmentSnapshot, Feedback, RecomputeSummary};
use crate::state::{RunFailure, RunStatus};
use crate::storage::retry::with_write_retry;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{DirectoryEntry, ResetSummary, RunRecord, UpsertOutcome};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Storage handle shared between crawl tasks
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

const LEAD_COLUMNS: &str = "id, name, email, phone, whatsapp, role, company, source_url, \
     source_portal, source_query, industry, lead_type, quality_score, confidence_score, \
     data_quality, tags, skills, created_at, updated_at";

const RUN_COLUMNS: &str =
    "id, started_at, finished_at, config_hash, status, links_checked, leads_accepted, error_class, error_message";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
    write_backoff: Backoff,
}

impl SqliteStorage {
    /// Opens (or creates) the database at `path` with the default lock policy
    pub fn new(path: &Path) -> StorageResult<Self> {
        Self::open(&StorageConfig::at(path.to_string_lossy()))
    }

    /// Opens the database described by `config`
    ///
    /// The connection runs in WAL mode so the background learner and external
    /// importers can read while the crawler writes.
    pub fn open(config: &StorageConfig) -> StorageResult<Self> {
        let conn = Connection::open(&config.database_path).map_err(StorageError::classify)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )
        .map_err(StorageError::classify)?;

        conn.busy_timeout(Duration::from_secs(2))?;
        initialize_schema(&conn).map_err(StorageError::classify)?;
        // Lock waits are handled by the retry wrapper from here on
        conn.busy_timeout(Duration::ZERO)?;

        Ok(Self {
            conn,
            write_backoff: write_backoff(config),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn,
            write_backoff: write_backoff(&StorageConfig::at(":memory:")),
        })
    }

    /// Wraps this storage for sharing across tasks
    pub fn into_shared(self) -> SharedStorage {
        Arc::new(Mutex::new(self))
    }

    pub fn write_backoff(&self) -> Backoff {
        self.write_backoff
    }

    /// Runs an arbitrary write through the retry wrapper
    pub fn write<T, F>(&mut self, op: F) -> StorageResult<T>
    where
        F: FnMut(&Transaction<'_>) -> rusqlite::Result<T>,
    {
        let backoff = self.write_backoff;
        with_write_retry(&mut self.conn, &backoff, op)
    }

    fn upsert(&mut self, lead: &Lead, external_id: Option<&str>) -> StorageResult<UpsertOutcome> {
        if !lead.has_contact() {
            return Err(StorageError::MissingContact(lead.source_url.clone()));
        }
        self.write(|tx| upsert_in_tx(tx, lead, external_id))
    }

    fn find_lead_by(&self, column: &str, value: &str) -> StorageResult<Option<Lead>> {
        let sql = format!("SELECT {} FROM leads WHERE {} = ?1", LEAD_COLUMNS, column);
        Ok(self.conn.query_row(&sql, [value], lead_from_row).optional()?)
    }
}

/// Runs `op` against shared storage on the blocking thread pool
pub async fn with_storage<T, F>(storage: &SharedStorage, op: F) -> StorageResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut SqliteStorage) -> StorageResult<T> + Send + 'static,
{
    let storage = Arc::clone(storage);
    tokio::task::spawn_blocking(move || op(&mut storage.lock()))
        .await
        .map_err(|e| StorageError::Unavailable(format!("storage task failed: {}", e)))?
}

fn write_backoff(config: &StorageConfig) -> Backoff {
    let base = Duration::from_millis(config.lock_backoff_ms);
    Backoff::new(base, base.saturating_mul(64), config.lock_retries)
}

fn to_json(values: &[String]) -> rusqlite::Result<String> {
    serde_json::to_string(values).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn score_from_db(value: i64) -> u8 {
    clamp_score(value)
}

fn lead_from_row(row: &Row<'_>) -> rusqlite::Result<Lead> {
    let lead_type: String = row.get(11)?;
    let tags: String = row.get(15)?;
    let skills: String = row.get(16)?;
    Ok(Lead {
        id: Some(row.get(0)?),
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        whatsapp: row.get(4)?,
        role: row.get(5)?,
        company: row.get(6)?,
        source_url: row.get(7)?,
        source_portal: row.get(8)?,
        source_query: row.get(9)?,
        industry: row.get(10)?,
        lead_type: LeadType::from_db_string(&lead_type).unwrap_or(LeadType::Unknown),
        quality_score: score_from_db(row.get(12)?),
        confidence_score: score_from_db(row.get(13)?),
        data_quality: score_from_db(row.get(14)?),
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        skills: serde_json::from_str(&skills).unwrap_or_default(),
        created_at: parse_timestamp(row.get(17)?),
        updated_at: parse_timestamp(row.get(18)?),
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let status: String = row.get(4)?;
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&status).unwrap_or(RunStatus::Crashed),
        links_checked: row.get::<_, i64>(5)?.max(0) as u64,
        leads_accepted: row.get::<_, i64>(6)?.max(0) as u64,
        error_class: row.get(7)?,
        error_message: row.get(8)?,
    })
}

fn find_id(tx: &Transaction<'_>, column: &str, value: &str) -> rusqlite::Result<Option<i64>> {
    let sql = format!("SELECT id FROM leads WHERE {} = ?1", column);
    tx.query_row(&sql, [value], |row| row.get(0)).optional()
}

fn fill(target: &mut Option<String>, incoming: &Option<String>) {
    if target.is_none() {
        target.clone_from(incoming);
    }
}

/// Merges `incoming` into `existing`, keeping whichever value is better
///
/// `email_free`/`phone_free` are false when another row already owns the
/// incoming value, in which case it is not copied.
pub(crate) fn merge_lead(existing: &Lead, incoming: &Lead, email_free: bool, phone_free: bool) -> Lead {
    let mut merged = existing.clone();

    fill(&mut merged.name, &incoming.name);
    if email_free {
        fill(&mut merged.email, &incoming.email);
    }
    if phone_free {
        fill(&mut merged.phone, &incoming.phone);
    }
    fill(&mut merged.whatsapp, &incoming.whatsapp);
    fill(&mut merged.role, &incoming.role);
    fill(&mut merged.company, &incoming.company);
    fill(&mut merged.source_portal, &incoming.source_portal);
    fill(&mut merged.source_query, &incoming.source_query);
    fill(&mut merged.industry, &incoming.industry);

    if matches!(merged.lead_type, LeadType::Unknown | LeadType::Garbage)
        && matches!(incoming.lead_type, LeadType::Candidate | LeadType::EmployerAd)
    {
        merged.lead_type = incoming.lead_type;
    }

    merged.quality_score = merged.quality_score.max(incoming.quality_score);
    merged.confidence_score = merged.confidence_score.max(incoming.confidence_score);
    merged.data_quality = merged.data_quality.max(incoming.data_quality);

    for tag in &incoming.tags {
        merged.add_tag(tag);
    }
    for skill in &incoming.skills {
        if !merged.skills.contains(skill) {
            merged.skills.push(skill.clone());
        }
    }
    merged
}

fn insert_lead(tx: &Transaction<'_>, lead: &Lead, now: &str, external_id: Option<&str>) -> rusqlite::Result<i64> {
    let synced_at = external_id.map(|_| now);
    tx.execute(
        "INSERT INTO leads (name, email, phone, whatsapp, role, company, source_url, source_portal,
            source_query, industry, lead_type, quality_score, confidence_score, data_quality,
            tags, skills, created_at, updated_at, synced_at, external_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?17, ?18, ?19)",
        params![
            lead.name,
            lead.email,
            lead.phone,
            lead.whatsapp,
            lead.role,
            lead.company,
            lead.source_url,
            lead.source_portal,
            lead.source_query,
            lead.industry,
            lead.lead_type.to_db_string(),
            lead.quality_score,
            lead.confidence_score,
            lead.data_quality,
            to_json(&lead.tags)?,
            to_json(&lead.skills)?,
            now,
            synced_at,
            external_id,
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

fn update_lead(tx: &Transaction<'_>, lead: &Lead, id: i64, now: &str) -> rusqlite::Result<()> {
    tx.execute(
        "UPDATE leads SET name = ?1, email = ?2, phone = ?3, whatsapp = ?4, role = ?5, company = ?6,
            source_portal = ?7, source_query = ?8, industry = ?9, lead_type = ?10,
            quality_score = ?11, confidence_score = ?12, data_quality = ?13,
            tags = ?14, skills = ?15, updated_at = ?16
         WHERE id = ?17",
        params![
            lead.name,
            lead.email,
            lead.phone,
            lead.whatsapp,
            lead.role,
            lead.company,
            lead.source_portal,
            lead.source_query,
            lead.industry,
            lead.lead_type.to_db_string(),
            lead.quality_score,
            lead.confidence_score,
            lead.data_quality,
            to_json(&lead.tags)?,
            to_json(&lead.skills)?,
            now,
            id,
        ],
    )?;
    Ok(())
}

fn upsert_in_tx(tx: &Transaction<'_>, lead: &Lead, external_id: Option<&str>) -> rusqlite::Result<UpsertOutcome> {
    let now = Utc::now().to_rfc3339();
    let by_email = match &lead.email {
        Some(email) => find_id(tx, "email", email)?,
        None => None,
    };
    let by_phone = match &lead.phone {
        Some(phone) => find_id(tx, "phone", phone)?,
        None => None,
    };

    let Some(id) = by_email.or(by_phone) else {
        let id = insert_lead(tx, lead, &now, external_id)?;
        return Ok(UpsertOutcome::Inserted(id));
    };

    let sql = format!("SELECT {} FROM leads WHERE id = ?1", LEAD_COLUMNS);
    let existing = tx.query_row(&sql, [id], lead_from_row)?;
    let email_free = by_email.map_or(true, |owner| owner == id);
    let phone_free = by_phone.map_or(true, |owner| owner == id);
    let merged = merge_lead(&existing, lead, email_free, phone_free);

    let changed = merged != existing;
    if changed {
        update_lead(tx, &merged, id, &now)?;
    }
    match external_id {
        Some(external_id) => {
            tx.execute(
                "UPDATE leads SET synced_at = ?1, external_id = ?2 WHERE id = ?3",
                params![now, external_id, id],
            )?;
        }
        None if changed => mark_stale(tx, id)?,
        None => {}
    }

    Ok(if changed {
        UpsertOutcome::Updated(id)
    } else {
        UpsertOutcome::Unchanged(id)
    })
}

/// Flags a previously synced row for replay after a local merge changed it
///
/// `external_id` is kept so the external store can update its copy. Every
/// checkpoint at or above the row is pulled back below it, since a checkpoint
/// promises that nothing at or below it is pending.
fn mark_stale(tx: &Transaction<'_>, id: i64) -> rusqlite::Result<()> {
    let cleared = tx.execute(
        "UPDATE leads SET synced_at = NULL WHERE id = ?1 AND synced_at IS NOT NULL",
        [id],
    )?;
    if cleared > 0 {
        tx.execute(
            "UPDATE sync_state SET last_id = ?1 - 1 WHERE last_id >= ?1",
            [id],
        )?;
        tracing::debug!(lead_id = id, "Merged update re-queued a synced lead");
    }
    Ok(())
}

fn recompute_in_tx(tx: &Transaction<'_>) -> rusqlite::Result<RecomputeSummary> {
    let current_version: i64 = tx.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM score_adjustments",
        [],
        |row| row.get(0),
    )?;
    let max_pending: Option<i64> =
        tx.query_row("SELECT MAX(id) FROM feedback WHERE processed = 0", [], |row| row.get(0))?;
    let Some(max_pending) = max_pending else {
        return Ok(RecomputeSummary {
            version: current_version,
            ..RecomputeSummary::default()
        });
    };

    let mut totals: HashMap<String, (u64, f64)> = HashMap::new();
    {
        let mut stmt = tx.prepare(
            "SELECT f.value, l.email, l.industry, l.source_portal
             FROM feedback f JOIN leads l ON l.id = f.lead_id
             WHERE f.processed = 0 AND f.id <= ?1",
        )?;
        let rows = stmt.query_map([max_pending], |row| {
            let mut lead = Lead::new(String::new());
            lead.email = row.get(1)?;
            lead.industry = row.get(2)?;
            lead.source_portal = row.get(3)?;
            Ok((row.get::<_, f64>(0)?, lead))
        })?;
        for row in rows {
            let (value, lead) = row?;
            for key in adjustment_keys(&lead) {
                let entry = totals.entry(key).or_insert((0, 0.0));
                entry.0 += 1;
                entry.1 += value;
            }
        }
    }

    let version = current_version + 1;
    let now = Utc::now().to_rfc3339();
    for (key, (n, sum)) in &totals {
        let existing = tx
            .query_row(
                "SELECT weight, confidence, sample_size FROM score_adjustments WHERE key = ?1",
                [key],
                |row| {
                    Ok(Adjustment {
                        weight: row.get(0)?,
                        confidence: row.get(1)?,
                        sample_size: row.get::<_, i64>(2)?.max(0) as u64,
                    })
                },
            )
            .optional()?
            .unwrap_or_default();
        let merged = existing.merge(*n, sum / *n as f64);
        tx.execute(
            "INSERT INTO score_adjustments (key, weight, confidence, sample_size, version, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(key) DO UPDATE SET
                weight = excluded.weight,
                confidence = excluded.confidence,
                sample_size = excluded.sample_size,
                version = excluded.version,
                updated_at = excluded.updated_at",
            params![key, merged.weight, merged.confidence, merged.sample_size as i64, version, now],
        )?;
    }

    let processed = tx.execute(
        "UPDATE feedback SET processed = 1 WHERE processed = 0 AND id <= ?1",
        [max_pending],
    )?;

    Ok(RecomputeSummary {
        version: if totals.is_empty() { current_version } else { version },
        keys_updated: totals.len(),
        feedback_processed: processed,
    })
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.write(|tx| {
            tx.execute(
                "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
                params![now, config_hash, RunStatus::Starting.to_db_string()],
            )?;
            Ok(tx.last_insert_rowid())
        })
    }

    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let updated = self.write(|tx| {
            tx.execute(
                "UPDATE runs SET status = ?1 WHERE id = ?2",
                params![status.to_db_string(), run_id],
            )
        })?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        counters: &CounterSnapshot,
        failure: Option<&RunFailure>,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.write(|tx| {
            tx.execute(
                "UPDATE runs SET status = ?1, finished_at = ?2, links_checked = ?3, pages_fetched = ?4,
                    leads_found = ?5, leads_accepted = ?6, queries_issued = ?7, blocked = ?8,
                    timeouts = ?9, errors = ?10, error_class = ?11, error_message = ?12
                 WHERE id = ?13",
                params![
                    status.to_db_string(),
                    now,
                    counters.links_checked as i64,
                    counters.pages_fetched as i64,
                    counters.leads_found as i64,
                    counters.leads_accepted as i64,
                    counters.queries_issued as i64,
                    counters.blocked as i64,
                    counters.timeouts as i64,
                    counters.errors as i64,
                    failure.map(|f| f.classification.as_str()),
                    failure.map(|f| f.message.as_str()),
                    run_id,
                ],
            )
        })?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let sql = format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS);
        self.conn
            .query_row(&sql, [run_id], run_from_row)
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let sql = format!("SELECT {} FROM runs ORDER BY id DESC LIMIT 1", RUN_COLUMNS);
        Ok(self.conn.query_row(&sql, [], run_from_row).optional()?)
    }

    fn list_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        let sql = format!("SELECT {} FROM runs ORDER BY id DESC LIMIT ?1", RUN_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let runs = stmt
            .query_map([limit as i64], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    // ===== Leads =====

    fn upsert_lead(&mut self, lead: &Lead) -> StorageResult<UpsertOutcome> {
        self.upsert(lead, None)
    }

    fn upsert_lead_synced(&mut self, lead: &Lead, external_id: &str) -> StorageResult<UpsertOutcome> {
        self.upsert(lead, Some(external_id))
    }

    fn get_lead(&self, id: i64) -> StorageResult<Option<Lead>> {
        let sql = format!("SELECT {} FROM leads WHERE id = ?1", LEAD_COLUMNS);
        Ok(self.conn.query_row(&sql, [id], lead_from_row).optional()?)
    }

    fn find_lead_by_email(&self, email: &str) -> StorageResult<Option<Lead>> {
        self.find_lead_by("email", email)
    }

    fn find_lead_by_phone(&self, phone: &str) -> StorageResult<Option<Lead>> {
        self.find_lead_by("phone", phone)
    }

    fn count_leads(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM leads", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_leads_by_type(&self) -> StorageResult<HashMap<LeadType, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT lead_type, COUNT(*) FROM leads GROUP BY lead_type")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let mut counts = HashMap::new();
        for row in rows {
            let (lead_type, count) = row?;
            if let Some(lead_type) = LeadType::from_db_string(&lead_type) {
                counts.insert(lead_type, count as u64);
            }
        }
        Ok(counts)
    }

    // ===== Dedup Indices =====

    fn mark_url_seen(&mut self, url: &str, run_id: Option<i64>) -> StorageResult<bool> {
        let now = Utc::now().to_rfc3339();
        let inserted = self.write(|tx| {
            tx.execute(
                "INSERT OR IGNORE INTO urls_seen (url, first_seen_at, run_id) VALUES (?1, ?2, ?3)",
                params![url, now, run_id],
            )
        })?;
        Ok(inserted == 1)
    }

    fn is_url_seen(&self, url: &str) -> StorageResult<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM urls_seen WHERE url = ?1)",
            [url],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn mark_query_done(&mut self, query: &str, run_id: Option<i64>, result_count: usize) -> StorageResult<bool> {
        let now = Utc::now().to_rfc3339();
        let inserted = self.write(|tx| {
            tx.execute(
                "INSERT OR IGNORE INTO queries_done (query, done_at, run_id, result_count) VALUES (?1, ?2, ?3, ?4)",
                params![query, now, run_id, result_count as i64],
            )
        })?;
        Ok(inserted == 1)
    }

    fn is_query_done(&self, query: &str) -> StorageResult<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM queries_done WHERE query = ?1)",
            [query],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn reset_dedup(&mut self) -> StorageResult<ResetSummary> {
        self.write(|tx| {
            Ok(ResetSummary {
                urls: tx.execute("DELETE FROM urls_seen", [])?,
                queries: tx.execute("DELETE FROM queries_done", [])?,
                directory_entries: tx.execute("DELETE FROM directory_cache", [])?,
            })
        })
    }

    // ===== Directory Cache =====

    fn get_directory_entry(&self, subject: &str) -> StorageResult<Option<DirectoryEntry>> {
        let entry = self
            .conn
            .query_row(
                "SELECT subject, found, listed_name, listed_address, source, looked_up_at
                 FROM directory_cache WHERE subject = ?1",
                [subject],
                |row| {
                    Ok(DirectoryEntry {
                        subject: row.get(0)?,
                        found: row.get(1)?,
                        listed_name: row.get(2)?,
                        listed_address: row.get(3)?,
                        source: row.get(4)?,
                        looked_up_at: parse_timestamp(row.get(5)?).unwrap_or_else(Utc::now),
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    fn put_directory_entry(&mut self, entry: &DirectoryEntry) -> StorageResult<()> {
        self.write(|tx| {
            tx.execute(
                "INSERT OR REPLACE INTO directory_cache
                    (subject, found, listed_name, listed_address, source, looked_up_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.subject,
                    entry.found,
                    entry.listed_name,
                    entry.listed_address,
                    entry.source,
                    entry.looked_up_at.to_rfc3339(),
                ],
            )
        })?;
        Ok(())
    }

    // ===== Learning =====

    fn record_feedback(&mut self, feedback: &Feedback) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.write(|tx| {
            tx.execute(
                "INSERT INTO feedback (lead_id, kind, value, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![feedback.lead_id, feedback.kind.to_db_string(), feedback.value, now],
            )?;
            Ok(tx.last_insert_rowid())
        })
    }

    fn load_adjustments(&self) -> StorageResult<AdjustmentSnapshot> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, weight, confidence, sample_size, version FROM score_adjustments")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                Adjustment {
                    weight: row.get(1)?,
                    confidence: row.get(2)?,
                    sample_size: row.get::<_, i64>(3)?.max(0) as u64,
                },
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut snapshot = AdjustmentSnapshot::default();
        for row in rows {
            let (key, adjustment, version) = row?;
            snapshot.version = snapshot.version.max(version);
            snapshot.entries.insert(key, adjustment);
        }
        Ok(snapshot)
    }

    fn recompute_adjustments(&mut self) -> StorageResult<RecomputeSummary> {
        self.write(recompute_in_tx)
    }

    // ===== External Sync =====

    fn unsynced_leads(&self, after_id: i64, limit: usize) -> StorageResult<Vec<Lead>> {
        let sql = format!(
            "SELECT {} FROM leads WHERE synced_at IS NULL AND id > ?1 ORDER BY id LIMIT ?2",
            LEAD_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let leads = stmt
            .query_map(params![after_id, limit as i64], lead_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(leads)
    }

    fn mark_synced(&mut self, lead_id: i64, external_id: &str, checkpoint: &str) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.write(|tx| {
            tx.execute(
                "UPDATE leads SET synced_at = ?1, external_id = ?2 WHERE id = ?3",
                params![now, external_id, lead_id],
            )?;
            tx.execute(
                "INSERT INTO sync_state (name, last_id, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET
                    last_id = MAX(sync_state.last_id, excluded.last_id),
                    updated_at = excluded.updated_at",
                params![checkpoint, lead_id, now],
            )?;
            Ok(())
        })
    }

    fn get_checkpoint(&self, name: &str) -> StorageResult<i64> {
        let last_id = self
            .conn
            .query_row("SELECT last_id FROM sync_state WHERE name = ?1", [name], |row| row.get(0))
            .optional()?;
        Ok(last_id.unwrap_or(0))
    }

    fn set_checkpoint(&mut self, name: &str, last_id: i64) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.write(|tx| {
            tx.execute(
                "INSERT INTO sync_state (name, last_id, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET last_id = excluded.last_id, updated_at = excluded.updated_at",
                params![name, last_id, now],
            )?;
            Ok(())
        })
    }

    fn count_unsynced(&self) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM leads WHERE synced_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
