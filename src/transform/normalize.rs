//! Incremental normalization of staged rows into typed tables
//!
//! Each (source, entity) pair gets one table `_raw_<source>_<entity>` whose
//! columns come from the inferred schema, keyed by the dedup key with the
//! content hash alongside. Schema drift is recovered by destructive
//! recreate: the table is dropped, every staged row of the pair is reset to
//! unprocessed, and normalization re-runs from a fresh inference. Dropped
//! table rows remain recoverable from the immutable staging rows.

use crate::infer::{infer, to_column_types, ColumnType};
use crate::storage::{StagedRow, StagingDb};
use crate::{Result, TributaryError};
use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use std::collections::BTreeMap;

/// Rows sampled for the initial schema inference
pub const SAMPLE_LIMIT: usize = 10_000;

/// Rows upserted per batch
pub const BATCH_SIZE: usize = 1_000;

/// Drift recoveries allowed before giving up on a table
pub const DRIFT_RETRY_LIMIT: u32 = 10;

/// Normalization state machine per table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Uninitialized,
    SchemaKnown,
    Live,
    Drifted,
}

/// Builds the normalized table name for a pair
pub fn table_name(source_id: &str, entity: &str) -> String {
    format!("_raw_{}_{}", source_id, entity)
}

/// Quotes an identifier for SQL, doubling embedded quotes
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Drives normalization for one staging database
pub struct Normalizer<'a> {
    staging: &'a mut StagingDb,
}

impl<'a> Normalizer<'a> {
    pub fn new(staging: &'a mut StagingDb) -> Self {
        Self { staging }
    }

    /// Normalizes every unprocessed deduplicated row of one pair
    pub fn normalize_pair(&mut self, source_id: &str, entity: &str) -> Result<()> {
        let table = table_name(source_id, entity);
        let mut drift_attempts: u32 = 0;
        let mut columns: BTreeMap<String, ColumnType> = BTreeMap::new();

        let mut state = match self.existing_columns(&table)? {
            Some(existing) => {
                columns = existing;
                TableState::Live
            }
            None => TableState::Uninitialized,
        };

        loop {
            match state {
                TableState::Uninitialized => {
                    let sample = self
                        .staging
                        .unprocessed_batch(source_id, entity, SAMPLE_LIMIT)?;
                    if sample.is_empty() {
                        return Ok(());
                    }
                    let rows: Vec<Value> = sample.iter().map(|r| r.data.clone()).collect();
                    columns = to_column_types(&infer(&rows, None));
                    state = TableState::SchemaKnown;
                }

                TableState::SchemaKnown => {
                    self.create_table(&table, &columns)?;
                    tracing::info!("Created table {} with {} columns", table, columns.len());
                    state = TableState::Live;
                }

                TableState::Live => loop {
                    let batch = self
                        .staging
                        .unprocessed_batch(source_id, entity, BATCH_SIZE)?;
                    if batch.is_empty() {
                        return Ok(());
                    }
                    if batch_has_drift(&batch, &columns) {
                        state = TableState::Drifted;
                        break;
                    }
                    self.upsert_batch(&table, &columns, &batch)?;
                    let ids: Vec<i64> = batch.iter().map(|r| r.id).collect();
                    self.staging.mark_processed(&ids)?;
                },

                TableState::Drifted => {
                    drift_attempts += 1;
                    if drift_attempts > DRIFT_RETRY_LIMIT {
                        return Err(TributaryError::SchemaDriftExhausted {
                            table,
                            attempts: drift_attempts - 1,
                        });
                    }
                    tracing::warn!(
                        "Schema drift on {}, recreating ({}/{})",
                        table,
                        drift_attempts,
                        DRIFT_RETRY_LIMIT
                    );
                    self.drop_table(&table)?;
                    self.staging.reset_processed(source_id, entity)?;
                    columns.clear();
                    state = TableState::Uninitialized;
                }
            }
        }
    }

    /// Payload columns of an existing table, None if the table is absent
    fn existing_columns(&self, table: &str) -> Result<Option<BTreeMap<String, ColumnType>>> {
        let conn = self.staging.connection();
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Ok(None);
        }

        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut columns = BTreeMap::new();
        for (name, sql_type) in rows {
            if name == "__key" || name == "__hash" {
                continue;
            }
            columns.insert(
                name,
                ColumnType::from_sql_type(&sql_type).unwrap_or(ColumnType::Text),
            );
        }
        Ok(Some(columns))
    }

    fn create_table(&self, table: &str, columns: &BTreeMap<String, ColumnType>) -> Result<()> {
        let mut defs = vec![
            "\"__key\" TEXT PRIMARY KEY".to_string(),
            "\"__hash\" TEXT NOT NULL".to_string(),
        ];
        for (name, column_type) in columns {
            defs.push(format!("{} {}", quote_ident(name), column_type.sql_type()));
        }
        let sql = format!("CREATE TABLE {} ({})", quote_ident(table), defs.join(", "));
        self.staging.connection().execute(&sql, [])?;
        Ok(())
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        self.staging
            .connection()
            .execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)), [])?;
        Ok(())
    }

    /// Upserts a batch by primary key; rows whose stored hash already
    /// matches are never re-written
    fn upsert_batch(
        &self,
        table: &str,
        columns: &BTreeMap<String, ColumnType>,
        batch: &[StagedRow],
    ) -> Result<()> {
        let names: Vec<&String> = columns.keys().collect();

        let mut column_list = vec!["\"__key\"".to_string(), "\"__hash\"".to_string()];
        column_list.extend(names.iter().map(|n| quote_ident(n)));

        let placeholders: Vec<String> = (1..=column_list.len()).map(|i| format!("?{}", i)).collect();

        let mut updates = vec!["\"__hash\" = excluded.\"__hash\"".to_string()];
        updates.extend(
            names
                .iter()
                .map(|n| format!("{} = excluded.{}", quote_ident(n), quote_ident(n))),
        );

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})
             ON CONFLICT(\"__key\") DO UPDATE SET {}
             WHERE \"__hash\" != excluded.\"__hash\"",
            quote_ident(table),
            column_list.join(", "),
            placeholders.join(", "),
            updates.join(", ")
        );

        let conn = self.staging.connection();
        let mut stmt = conn.prepare(&sql)?;
        for row in batch {
            let mut values: Vec<SqlValue> = Vec::with_capacity(column_list.len());
            values.push(SqlValue::Text(row.dedup_key.clone()));
            values.push(SqlValue::Text(row.content_hash.clone()));
            for name in &names {
                values.push(json_to_sql(row.data.get(name.as_str())));
            }
            stmt.execute(rusqlite::params_from_iter(values))?;
        }
        Ok(())
    }
}

/// True when a row carries a field the table has no column for
fn batch_has_drift(batch: &[StagedRow], columns: &BTreeMap<String, ColumnType>) -> bool {
    for row in batch {
        if let Value::Object(map) = &row.data {
            for key in map.keys() {
                if !columns.contains_key(key) {
                    tracing::debug!("New field '{}' not in table columns", key);
                    return true;
                }
            }
        }
    }
    false
}

/// Maps a payload value to a SQL parameter; nested structures are stored
/// as compact JSON text
fn json_to_sql(value: Option<&Value>) -> SqlValue {
    match value {
        None | Some(Value::Null) => SqlValue::Null,
        Some(Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Some(Value::String(s)) => SqlValue::Text(s.clone()),
        Some(other) => SqlValue::Text(other.to_string()),
    }
}
