//! Persistent cursor state
//!
//! Each strategy owns a small opaque map of state (typically just the
//! pagination cursor), persisted after every successful page and reloaded
//! at strategy start so an interrupted crawl resumes where it stopped.

mod file_store;
mod sqlite_store;

pub use file_store::FileStateStore;
pub use sqlite_store::SqliteStateStore;

use crate::Result;

/// Opaque per-entity state map
pub type StateMap = serde_json::Map<String, serde_json::Value>;

/// Key-value persistence for cursor state, keyed by (source, entity)
pub trait StateStore {
    /// Loads the state for a key; a never-saved key is the empty map
    fn load(&self, key: &str) -> Result<StateMap>;

    /// Persists the state for a key
    fn save(&mut self, key: &str, state: &StateMap) -> Result<()>;
}

/// Builds the state key for a (source, entity) pair
pub fn state_key(source_id: &str, entity: &str) -> String {
    format!("{}.{}", source_id, entity)
}
