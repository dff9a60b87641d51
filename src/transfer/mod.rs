//! Differential transfer to destination backends
//!
//! Syncs normalized tables to a destination using the per-destination
//! transfer ledger: only rows whose content hash is new are uploaded, rows
//! whose hash disappeared from the source are deleted. The backend variant
//! is selected by inspecting the destination's connection scheme.

mod jsonl_loader;
mod loader;
mod sqlite_loader;

pub use jsonl_loader::JsonlLoader;
pub use loader::{
    read_source_table, transfer_table, ColumnDef, DestinationLoader, SourceTable, TransferRow,
    TransferStats,
};
pub use sqlite_loader::SqliteLoader;

use crate::storage::StagingDb;
use crate::{Result, TributaryError};
use std::path::Path;

/// Selects the loader for a destination URI
pub fn loader_for(dest_uri: &str) -> Result<Box<dyn DestinationLoader>> {
    if SqliteLoader::supports(dest_uri) {
        return Ok(Box::new(SqliteLoader::open(dest_uri)?));
    }
    if JsonlLoader::supports(dest_uri) {
        return Ok(Box::new(JsonlLoader::open(dest_uri)?));
    }
    Err(TributaryError::UnsupportedDestination(dest_uri.to_string()))
}

fn source_path(source_uri: &str) -> &str {
    source_uri
        .strip_prefix("sqlite://")
        .or_else(|| source_uri.strip_prefix("sqlite:"))
        .unwrap_or(source_uri)
}

/// Runs the transfer stage: every normalized table to one destination
///
/// # Arguments
///
/// * `source_uri` - The staging database holding normalized tables
/// * `dest_uri` - The destination; scheme selects the backend
pub fn run_transfer(source_uri: &str, dest_uri: &str) -> Result<()> {
    let mut staging = StagingDb::open(Path::new(source_path(source_uri)))?;
    let mut loader = loader_for(dest_uri)?;

    let tables: Vec<String> = {
        let mut stmt = staging.connection().prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name LIKE '\\_raw\\_%' ESCAPE '\\'
             ORDER BY name",
        )?;
        let names = stmt.query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        names
    };

    for table in &tables {
        let stats = transfer_table(&mut staging, loader.as_mut(), table)?;
        tracing::info!(
            "Transferred {}: +{} -{}{}",
            table,
            stats.added,
            stats.removed,
            if stats.recreated { " (recreated)" } else { "" }
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Normalizer;
    use serde_json::json;
    use tempfile::TempDir;

    fn staged_pair(staging: &mut StagingDb, items: &[serde_json::Value]) {
        staging
            .append("src", "e", &["id".to_string()], items)
            .unwrap();
        Normalizer::new(staging).normalize_pair("src", "e").unwrap();
    }

    fn dest_count(path: &std::path::Path, table: &str) -> i64 {
        let conn = rusqlite::Connection::open(path).unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    #[test]
    fn test_transfer_diff_add_then_remove() {
        let dir = TempDir::new().unwrap();
        let dest_path = dir.path().join("dest.db");
        let dest_uri = dest_path.to_string_lossy().into_owned();

        let mut staging = StagingDb::open_in_memory().unwrap();
        staged_pair(
            &mut staging,
            &[json!({"id": 1, "v": "a"}), json!({"id": 2, "v": "b"})],
        );

        // First pass: destination empty, both rows uploaded
        let mut loader = loader_for(&dest_uri).unwrap();
        let stats = transfer_table(&mut staging, loader.as_mut(), "_raw_src_e").unwrap();
        assert!(stats.recreated);
        assert_eq!(stats.added, 2);
        assert_eq!(dest_count(&dest_path, "_raw_src_e"), 2);
        assert_eq!(staging.ledger_hashes(&dest_uri, "_raw_src_e").unwrap().len(), 2);

        // Second pass with no changes: nothing moves
        let stats = transfer_table(&mut staging, loader.as_mut(), "_raw_src_e").unwrap();
        assert_eq!(stats.added, 0);
        assert_eq!(stats.removed, 0);

        // Remove one row from the source table; the diff deletes it
        staging
            .connection()
            .execute("DELETE FROM \"_raw_src_e\" WHERE \"id\" = 1", [])
            .unwrap();
        let stats = transfer_table(&mut staging, loader.as_mut(), "_raw_src_e").unwrap();
        assert_eq!(stats.removed, 1);
        assert_eq!(dest_count(&dest_path, "_raw_src_e"), 1);
        assert_eq!(staging.ledger_hashes(&dest_uri, "_raw_src_e").unwrap().len(), 1);
    }

    #[test]
    fn test_transfer_recreates_on_schema_mismatch() {
        let dir = TempDir::new().unwrap();
        let dest_path = dir.path().join("dest.db");
        let dest_uri = dest_path.to_string_lossy().into_owned();

        let mut staging = StagingDb::open_in_memory().unwrap();
        staged_pair(&mut staging, &[json!({"id": 1, "v": "a"})]);

        // Destination table with a different shape, plus a stale ledger
        {
            let conn = rusqlite::Connection::open(&dest_path).unwrap();
            conn.execute("CREATE TABLE \"_raw_src_e\" (\"old\" TEXT)", [])
                .unwrap();
        }
        staging
            .ledger_insert(&dest_uri, "_raw_src_e", &["stale".to_string()])
            .unwrap();

        let mut loader = loader_for(&dest_uri).unwrap();
        let stats = transfer_table(&mut staging, loader.as_mut(), "_raw_src_e").unwrap();

        assert!(stats.recreated);
        assert_eq!(stats.added, 1);
        assert_eq!(dest_count(&dest_path, "_raw_src_e"), 1);
        // Stale ledger entry cleared by the full resync
        let hashes = staging.ledger_hashes(&dest_uri, "_raw_src_e").unwrap();
        assert!(!hashes.contains(&"stale".to_string()));
    }

    #[test]
    fn test_unknown_destination_rejected() {
        let err = loader_for("ftp://elsewhere/export").unwrap_err();
        assert!(matches!(err, TributaryError::UnsupportedDestination(_)));
    }
}
