//! Database schema definitions
//!
//! `leads`, `runs`, `urls_seen`, `queries_done` and `directory_cache` are read
//! by external importers; column names are part of that contract.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per scrape invocation
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    links_checked INTEGER NOT NULL DEFAULT 0,
    pages_fetched INTEGER NOT NULL DEFAULT 0,
    leads_found INTEGER NOT NULL DEFAULT 0,
    leads_accepted INTEGER NOT NULL DEFAULT 0,
    queries_issued INTEGER NOT NULL DEFAULT 0,
    blocked INTEGER NOT NULL DEFAULT 0,
    timeouts INTEGER NOT NULL DEFAULT 0,
    errors INTEGER NOT NULL DEFAULT 0,
    error_class TEXT,
    error_message TEXT
);

-- De-duplicated contact leads; NULL email/phone never collide
CREATE TABLE IF NOT EXISTS leads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT,
    email TEXT UNIQUE,
    phone TEXT UNIQUE,
    whatsapp TEXT,
    role TEXT,
    company TEXT,
    source_url TEXT NOT NULL,
    source_portal TEXT,
    source_query TEXT,
    industry TEXT,
    lead_type TEXT NOT NULL,
    quality_score INTEGER NOT NULL DEFAULT 0 CHECK (quality_score BETWEEN 0 AND 100),
    confidence_score INTEGER NOT NULL DEFAULT 0 CHECK (confidence_score BETWEEN 0 AND 100),
    data_quality INTEGER NOT NULL DEFAULT 0 CHECK (data_quality BETWEEN 0 AND 100),
    tags TEXT NOT NULL DEFAULT '[]',
    skills TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    synced_at TEXT,
    external_id TEXT
);

CREATE INDEX IF NOT EXISTS idx_leads_unsynced ON leads(id) WHERE synced_at IS NULL;
CREATE INDEX IF NOT EXISTS idx_leads_type ON leads(lead_type);

CREATE TABLE IF NOT EXISTS urls_seen (
    url TEXT PRIMARY KEY,
    first_seen_at TEXT NOT NULL,
    run_id INTEGER
);

CREATE TABLE IF NOT EXISTS queries_done (
    query TEXT PRIMARY KEY,
    done_at TEXT NOT NULL,
    run_id INTEGER,
    result_count INTEGER NOT NULL DEFAULT 0
);

-- Phone-directory lookups, including misses
CREATE TABLE IF NOT EXISTS directory_cache (
    subject TEXT PRIMARY KEY,
    found INTEGER NOT NULL,
    listed_name TEXT,
    listed_address TEXT,
    source TEXT NOT NULL,
    looked_up_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS feedback (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    lead_id INTEGER NOT NULL REFERENCES leads(id),
    kind TEXT NOT NULL,
    value REAL NOT NULL,
    created_at TEXT NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_feedback_pending ON feedback(id) WHERE processed = 0;

CREATE TABLE IF NOT EXISTS score_adjustments (
    key TEXT PRIMARY KEY,
    weight REAL NOT NULL,
    confidence REAL NOT NULL,
    sample_size INTEGER NOT NULL,
    version INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);

-- Reconciliation checkpoints (last local lead id replayed externally)
CREATE TABLE IF NOT EXISTS sync_state (
    name TEXT PRIMARY KEY,
    last_id INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

pub const SCHEMA_VERSION: u32 = 1;
