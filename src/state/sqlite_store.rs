use crate::state::{StateMap, StateStore};
use crate::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// Relational state store backed by a `crawl_state` table
pub struct SqliteStateStore {
    conn: Connection,
}

impl SqliteStateStore {
    /// Opens (creating if needed) a sqlite-backed state store
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Creates an in-memory state store
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS crawl_state (
                key TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }
}

impl StateStore for SqliteStateStore {
    fn load(&self, key: &str) -> Result<StateMap> {
        let state: Option<String> = self
            .conn
            .query_row(
                "SELECT state FROM crawl_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        match state {
            Some(content) => Ok(serde_json::from_str(&content)?),
            None => Ok(StateMap::new()),
        }
    }

    fn save(&mut self, key: &str, state: &StateMap) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT OR REPLACE INTO crawl_state (key, state, updated_at) VALUES (?1, ?2, ?3)",
            params![key, serde_json::to_string(state)?, now],
        )?;
        Ok(())
    }
}
