//! Staging storage for raw entity rows
//!
//! This module handles the staging database shared by the pipeline stages:
//! - Append-only staging of raw items with dedup-ready fields
//! - The "latest row per key" deduplication view
//! - The per-destination transfer ledger
//! - Canonical serialization and content hashing

mod hash;
mod schema;
mod staging;

pub use hash::{canonical_json, content_hash, dedup_key};
pub use schema::{initialize_schema, DEDUP_VIEW_SQL, SCHEMA_SQL};
pub use staging::{AppendStats, StagingDb, StagingSink};

/// One raw fetched record in staging
#[derive(Debug, Clone)]
pub struct StagedRow {
    pub id: i64,
    pub source_id: String,
    pub entity: String,
    pub dedup_key: String,
    pub content_hash: String,
    pub data: serde_json::Value,
    pub created_at: String,
    pub processed: bool,
}

/// A (source, entity) pair active in staging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityPair {
    pub source_id: String,
    pub entity: String,
}
