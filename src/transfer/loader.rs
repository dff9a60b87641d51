//! Destination loader contract and the shared diff algorithm
//!
//! Each backend implements `DestinationLoader`; `transfer_table` drives the
//! ledger-based reconciliation that is common to all of them. Ledger writes
//! always happen after the destination write, so a crash in between
//! redelivers the same rows on the next pass instead of losing them.

use crate::storage::StagingDb;
use crate::{Result, TributaryError};
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use std::collections::HashSet;

/// One column of a normalized source table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: String,
    pub primary_key: bool,
}

/// Introspected source table: name, column definitions
#[derive(Debug, Clone)]
pub struct SourceTable {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl SourceTable {
    /// (name, type) pairs used for destination comparison
    pub fn column_signature(&self) -> Vec<(String, String)> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.sql_type.clone()))
            .collect()
    }
}

/// One source row ready for upload, values aligned with the column list
#[derive(Debug, Clone)]
pub struct TransferRow {
    pub hash: String,
    pub values: Vec<SqlValue>,
}

/// Backend-specific destination operations
pub trait DestinationLoader: std::fmt::Debug {
    /// Identifier recorded in the ledger for this destination
    fn destination_id(&self) -> &str;

    /// Whether the destination table exists with the same column set
    fn table_matches(&mut self, table: &SourceTable) -> Result<bool>;

    /// Drops and recreates the destination table from the source schema
    fn recreate_table(&mut self, table: &SourceTable) -> Result<()>;

    /// Uploads added rows (backend-specific bulk-insert mechanism)
    fn upload(&mut self, table: &SourceTable, rows: &[TransferRow]) -> Result<()>;

    /// Deletes destination rows matching the given hashes
    fn remove(&mut self, table: &SourceTable, hashes: &[String]) -> Result<()>;
}

/// Outcome of one table transfer
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferStats {
    pub added: usize,
    pub removed: usize,
    pub recreated: bool,
}

/// Introspects a normalized table in the source database
pub fn read_source_table(conn: &Connection, name: &str) -> Result<SourceTable> {
    let mut stmt = conn.prepare(&format!(
        "PRAGMA table_info(\"{}\")",
        name.replace('"', "\"\"")
    ))?;
    let columns = stmt
        .query_map([], |row| {
            Ok(ColumnDef {
                name: row.get(1)?,
                sql_type: row.get(2)?,
                primary_key: row.get::<_, i64>(5)? != 0,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if columns.is_empty() {
        return Err(TributaryError::UnsupportedDestination(format!(
            "source table '{}' does not exist",
            name
        )));
    }
    Ok(SourceTable {
        name: name.to_string(),
        columns,
    })
}

/// Reads every row of a source table, capturing the content hash
fn read_rows(conn: &Connection, table: &SourceTable) -> Result<Vec<TransferRow>> {
    let hash_index = table
        .columns
        .iter()
        .position(|c| c.name == "__hash")
        .ok_or_else(|| {
            TributaryError::UnsupportedDestination(format!(
                "table '{}' has no __hash column",
                table.name
            ))
        })?;

    let column_list: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("\"{}\"", c.name.replace('"', "\"\"")))
        .collect();
    let sql = format!(
        "SELECT {} FROM \"{}\"",
        column_list.join(", "),
        table.name.replace('"', "\"\"")
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            let mut values = Vec::with_capacity(table.columns.len());
            for i in 0..table.columns.len() {
                values.push(row.get::<_, SqlValue>(i)?);
            }
            Ok(values)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut transfer_rows = Vec::with_capacity(rows.len());
    for values in rows {
        let hash = match &values[hash_index] {
            SqlValue::Text(s) => s.clone(),
            other => {
                return Err(TributaryError::UnsupportedDestination(format!(
                    "non-text __hash in table '{}': {:?}",
                    table.name, other
                )))
            }
        };
        transfer_rows.push(TransferRow { hash, values });
    }
    Ok(transfer_rows)
}

/// Transfers one table to a destination using the ledger diff
///
/// 1. Recreate the destination table (and clear its ledger) when absent or
///    its columns differ: a full resync.
/// 2. Added rows: source hashes not in the ledger.
/// 3. Removed hashes: ledger hashes no longer in the source.
/// 4. Upload added rows, then record their hashes.
/// 5. Delete removed rows at the destination, then unrecord them.
pub fn transfer_table(
    staging: &mut StagingDb,
    loader: &mut dyn DestinationLoader,
    name: &str,
) -> Result<TransferStats> {
    let table = read_source_table(staging.connection(), name)?;
    let destination_id = loader.destination_id().to_string();
    let mut stats = TransferStats::default();

    if !loader.table_matches(&table)? {
        loader.recreate_table(&table)?;
        staging.ledger_clear(&destination_id, name)?;
        stats.recreated = true;
    }

    let ledger: HashSet<String> = staging
        .ledger_hashes(&destination_id, name)?
        .into_iter()
        .collect();

    let rows = read_rows(staging.connection(), &table)?;
    let source_hashes: HashSet<String> = rows.iter().map(|r| r.hash.clone()).collect();

    let added: Vec<TransferRow> = rows
        .into_iter()
        .filter(|r| !ledger.contains(&r.hash))
        .collect();
    let removed: Vec<String> = ledger
        .iter()
        .filter(|h| !source_hashes.contains(*h))
        .cloned()
        .collect();

    tracing::info!(
        "Transfer {}: {} new rows, {} removed rows",
        name,
        added.len(),
        removed.len()
    );

    if !added.is_empty() {
        loader.upload(&table, &added)?;
        let hashes: Vec<String> = added.iter().map(|r| r.hash.clone()).collect();
        staging.ledger_insert(&destination_id, name, &hashes)?;
        stats.added = added.len();
    }

    if !removed.is_empty() {
        loader.remove(&table, &removed)?;
        staging.ledger_remove(&destination_id, name, &removed)?;
        stats.removed = removed.len();
    }

    Ok(stats)
}
