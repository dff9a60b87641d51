//! Normalization stage
//!
//! Rebuilds the deduplication view from the current key configuration,
//! then drives the per-table normalization state machine for every active
//! (source, entity) pair in staging.

mod normalize;

pub use normalize::{
    table_name, Normalizer, TableState, BATCH_SIZE, DRIFT_RETRY_LIMIT, SAMPLE_LIMIT,
};

use crate::config::SourceConfig;
use crate::storage::StagingDb;
use crate::Result;
use std::collections::BTreeMap;

/// Runs the normalization stage over a staging database
///
/// # Arguments
///
/// * `staging` - The staging database written by extraction
/// * `config` - The source configuration supplying per-entity dedup keys
pub fn run_normalization(staging: &mut StagingDb, config: &SourceConfig) -> Result<()> {
    let keys: BTreeMap<String, Vec<String>> = config
        .entities
        .iter()
        .map(|e| (e.name.clone(), e.dedup_keys.clone()))
        .collect();
    staging.rebuild_dedup_view(&config.id, &keys)?;

    for pair in staging.active_pairs()? {
        tracing::info!("Normalize entity: {}.{}", pair.source_id, pair.entity);
        Normalizer::new(staging).normalize_pair(&pair.source_id, &pair.entity)?;
    }
    Ok(())
}
