//! Staging database implementation
//!
//! The staging area is the raw, deduplicated-but-not-yet-typed storage
//! between extraction and normalization. Appends are idempotent: repeated
//! ingestion of identical upstream data never grows the table.

use crate::config::SourceConfig;
use crate::extract::ItemSink;
use crate::storage::hash::{content_hash, dedup_key};
use crate::storage::schema::{initialize_schema, DEDUP_VIEW_SQL};
use crate::storage::{EntityPair, StagedRow};
use crate::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Outcome of one append batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendStats {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Staging database handle
pub struct StagingDb {
    conn: Connection,
}

impl StagingDb {
    /// Opens (creating if needed) a staging database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Creates an in-memory staging database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Appends a batch of raw items for one (source, entity) pair
    ///
    /// Per item: compute the content hash and dedup key, then look up the
    /// existing row by (source, entity, key). Identical hash is a no-op; a
    /// different hash updates the payload and resets the processed flag; no
    /// existing row inserts a fresh unprocessed one.
    pub fn append(
        &mut self,
        source_id: &str,
        entity: &str,
        keys: &[String],
        items: &[Value],
    ) -> Result<AppendStats> {
        let tx = self.conn.transaction()?;
        let mut stats = AppendStats::default();
        let now = Utc::now().to_rfc3339();

        for item in items {
            let hash = content_hash(item);
            let key = dedup_key(item, keys);

            let existing: Option<(i64, String)> = tx
                .query_row(
                    "SELECT id, content_hash FROM staged_rows
                     WHERE source_id = ?1 AND entity = ?2 AND dedup_key = ?3
                     ORDER BY created_at DESC, id DESC LIMIT 1",
                    params![source_id, entity, key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match existing {
                Some((_, existing_hash)) if existing_hash == hash => {
                    stats.unchanged += 1;
                }
                Some((id, _)) => {
                    tx.execute(
                        "UPDATE staged_rows
                         SET data = ?1, content_hash = ?2, created_at = ?3, processed = 0
                         WHERE id = ?4",
                        params![item.to_string(), hash, now, id],
                    )?;
                    stats.updated += 1;
                }
                None => {
                    tx.execute(
                        "INSERT INTO staged_rows
                         (source_id, entity, dedup_key, content_hash, data, created_at, processed)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
                        params![source_id, entity, key, hash, item.to_string(), now],
                    )?;
                    stats.inserted += 1;
                }
            }
        }

        tx.commit()?;
        Ok(stats)
    }

    /// Lists the (source, entity) pairs present in staging
    pub fn active_pairs(&self) -> Result<Vec<EntityPair>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT source_id, entity FROM staged_rows ORDER BY source_id, entity",
        )?;
        let pairs = stmt
            .query_map([], |row| {
                Ok(EntityPair {
                    source_id: row.get(0)?,
                    entity: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(pairs)
    }

    /// Rebuilds the deduplication view after a key-configuration change
    ///
    /// Recomputes the dedup key of every staged row belonging to the given
    /// source from the current per-entity key fields, then recreates the
    /// rank-1 view. The view is a rebuildable projection, not an
    /// incrementally maintained structure.
    pub fn rebuild_dedup_view(
        &mut self,
        source_id: &str,
        keys_by_entity: &BTreeMap<String, Vec<String>>,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;

        for (entity, keys) in keys_by_entity {
            let rows: Vec<(i64, String, String)> = {
                let mut stmt = tx.prepare(
                    "SELECT id, data, dedup_key FROM staged_rows
                     WHERE source_id = ?1 AND entity = ?2",
                )?;
                let rows = stmt.query_map(params![source_id, entity], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            };

            for (id, data, old_key) in rows {
                let value: Value = serde_json::from_str(&data)?;
                let new_key = dedup_key(&value, keys);
                if new_key != old_key {
                    tx.execute(
                        "UPDATE staged_rows SET dedup_key = ?1 WHERE id = ?2",
                        params![new_key, id],
                    )?;
                }
            }
        }

        tx.execute_batch("DROP VIEW IF EXISTS dedup_latest;")?;
        tx.execute_batch(DEDUP_VIEW_SQL)?;
        tx.commit()?;
        Ok(())
    }

    /// Fetches the next batch of unprocessed deduplicated rows for a pair
    pub fn unprocessed_batch(
        &self,
        source_id: &str,
        entity: &str,
        limit: usize,
    ) -> Result<Vec<StagedRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, source_id, entity, dedup_key, content_hash, data, created_at, processed
             FROM dedup_latest
             WHERE source_id = ?1 AND entity = ?2 AND processed = 0
             ORDER BY id LIMIT ?3",
        )?;

        let rows = stmt
            .query_map(params![source_id, entity, limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut staged = Vec::with_capacity(rows.len());
        for (id, source_id, entity, key, hash, data, created_at, processed) in rows {
            staged.push(StagedRow {
                id,
                source_id,
                entity,
                dedup_key: key,
                content_hash: hash,
                data: serde_json::from_str(&data)?,
                created_at,
                processed: processed != 0,
            });
        }
        Ok(staged)
    }

    /// Marks staged rows as processed
    pub fn mark_processed(&mut self, ids: &[i64]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE staged_rows SET processed = 1 WHERE id = ?1")?;
            for id in ids {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Resets every staged row of a pair to unprocessed (drift recovery)
    pub fn reset_processed(&mut self, source_id: &str, entity: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE staged_rows SET processed = 0 WHERE source_id = ?1 AND entity = ?2",
            params![source_id, entity],
        )?;
        Ok(())
    }

    /// Counts staged rows for a pair
    pub fn staged_count(&self, source_id: &str, entity: &str) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM staged_rows WHERE source_id = ?1 AND entity = ?2",
            params![source_id, entity],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== Transfer ledger =====

    /// Hashes already delivered to a destination for a table
    pub fn ledger_hashes(&self, destination_id: &str, table: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT hash FROM transfer_ledger WHERE destination_id = ?1 AND table_name = ?2",
        )?;
        let hashes = stmt
            .query_map(params![destination_id, table], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(hashes)
    }

    /// Records delivered hashes in the ledger
    pub fn ledger_insert(
        &mut self,
        destination_id: &str,
        table: &str,
        hashes: &[String],
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO transfer_ledger (table_name, hash, destination_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for hash in hashes {
                stmt.execute(params![table, hash, destination_id, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Removes delivered hashes from the ledger
    pub fn ledger_remove(
        &mut self,
        destination_id: &str,
        table: &str,
        hashes: &[String],
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "DELETE FROM transfer_ledger
                 WHERE destination_id = ?1 AND table_name = ?2 AND hash = ?3",
            )?;
            for hash in hashes {
                stmt.execute(params![destination_id, table, hash])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Clears every ledger entry for a (destination, table), forcing a
    /// full resync
    pub fn ledger_clear(&mut self, destination_id: &str, table: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM transfer_ledger WHERE destination_id = ?1 AND table_name = ?2",
            params![destination_id, table],
        )?;
        Ok(())
    }
}

/// Sink adapter binding a staging database to a source's dedup keys
///
/// The extraction engine only knows the `ItemSink` interface; this adapter
/// supplies the per-entity key fields the staging append needs.
pub struct StagingSink<'a> {
    db: &'a mut StagingDb,
    keys: BTreeMap<String, Vec<String>>,
}

impl<'a> StagingSink<'a> {
    pub fn new(db: &'a mut StagingDb, config: &SourceConfig) -> Self {
        let keys = config
            .entities
            .iter()
            .map(|e| (e.name.clone(), e.dedup_keys.clone()))
            .collect();
        Self { db, keys }
    }
}

impl ItemSink for StagingSink<'_> {
    fn load(&mut self, source_id: &str, entity: &str, items: &[Value]) -> Result<()> {
        let keys = self.keys.get(entity).cloned().unwrap_or_default();
        let stats = self.db.append(source_id, entity, &keys, items)?;
        tracing::debug!(
            "Staged {} {} items ({} new, {} updated, {} unchanged)",
            items.len(),
            entity,
            stats.inserted,
            stats.updated,
            stats.unchanged
        );
        Ok(())
    }
}
