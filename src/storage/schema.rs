//! Staging database schema definitions
//!
//! This module contains the SQL schema for the staging area: raw entity
//! rows with dedup-ready fields, the per-destination transfer ledger, and
//! the default deduplication view.

/// SQL schema for the staging database
pub const SCHEMA_SQL: &str = r#"
-- Raw fetched rows, keyed by content hash and dedup key
CREATE TABLE IF NOT EXISTS staged_rows (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id TEXT NOT NULL,
    entity TEXT NOT NULL,
    dedup_key TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_staged_source_entity ON staged_rows(source_id, entity);
CREATE INDEX IF NOT EXISTS idx_staged_key ON staged_rows(source_id, entity, dedup_key);
CREATE INDEX IF NOT EXISTS idx_staged_processed ON staged_rows(processed);

-- Which hashed rows have already been pushed to which destination
CREATE TABLE IF NOT EXISTS transfer_ledger (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    table_name TEXT NOT NULL,
    hash TEXT NOT NULL,
    destination_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ledger_dest_table ON transfer_ledger(destination_id, table_name);
"#;

/// The deduplication view: latest row per (source, entity, dedup key)
///
/// Kept separate from `SCHEMA_SQL` because the view is dropped and
/// recreated whenever the key configuration changes.
pub const DEDUP_VIEW_SQL: &str = r#"
CREATE VIEW IF NOT EXISTS dedup_latest AS
SELECT id, source_id, entity, dedup_key, content_hash, data, created_at, processed
FROM (
    SELECT staged_rows.*, ROW_NUMBER() OVER (
        PARTITION BY source_id, entity, dedup_key
        ORDER BY created_at DESC, id DESC
    ) AS inverse_rank
    FROM staged_rows
)
WHERE inverse_rank = 1;
"#;

/// Initializes the staging database schema
///
/// # Arguments
///
/// * `conn` - The database connection
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute_batch(DEDUP_VIEW_SQL)?;
    Ok(())
}
