use crate::transfer::loader::{DestinationLoader, SourceTable, TransferRow};
use crate::Result;
use rusqlite::Connection;

/// Direct batch-insert loader for sqlite destinations
#[derive(Debug)]
pub struct SqliteLoader {
    conn: Connection,
    destination_id: String,
}

impl SqliteLoader {
    /// Whether this loader handles the destination URI
    pub fn supports(uri: &str) -> bool {
        uri.starts_with("sqlite:")
            || uri.ends_with(".db")
            || uri.ends_with(".sqlite")
            || uri.ends_with(".sqlite3")
    }

    /// Opens (creating if needed) the destination database
    pub fn open(uri: &str) -> Result<Self> {
        let path = uri
            .strip_prefix("sqlite://")
            .or_else(|| uri.strip_prefix("sqlite:"))
            .unwrap_or(uri);
        let conn = Connection::open(path)?;
        Ok(Self {
            conn,
            destination_id: uri.to_string(),
        })
    }

    fn quoted(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

impl DestinationLoader for SqliteLoader {
    fn destination_id(&self) -> &str {
        &self.destination_id
    }

    fn table_matches(&mut self, table: &SourceTable) -> Result<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [&table.name],
            |row| row.get(0),
        )?;
        if exists == 0 {
            tracing::warn!("Table {} does not exist on destination", table.name);
            return Ok(false);
        }

        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", Self::quoted(&table.name)))?;
        let dest_columns: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(1)?, row.get(2)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let same = dest_columns == table.column_signature();
        if !same {
            tracing::warn!(
                "Table {} has different columns in source and destination",
                table.name
            );
        }
        Ok(same)
    }

    fn recreate_table(&mut self, table: &SourceTable) -> Result<()> {
        self.conn.execute(
            &format!("DROP TABLE IF EXISTS {}", Self::quoted(&table.name)),
            [],
        )?;

        let defs: Vec<String> = table
            .columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", Self::quoted(&c.name), c.sql_type);
                if c.primary_key {
                    def.push_str(" PRIMARY KEY");
                }
                def
            })
            .collect();
        self.conn.execute(
            &format!(
                "CREATE TABLE {} ({})",
                Self::quoted(&table.name),
                defs.join(", ")
            ),
            [],
        )?;
        Ok(())
    }

    fn upload(&mut self, table: &SourceTable, rows: &[TransferRow]) -> Result<()> {
        let column_list: Vec<String> =
            table.columns.iter().map(|c| Self::quoted(&c.name)).collect();
        let placeholders: Vec<String> =
            (1..=table.columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            Self::quoted(&table.name),
            column_list.join(", "),
            placeholders.join(", ")
        );

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                stmt.execute(rusqlite::params_from_iter(row.values.iter()))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn remove(&mut self, table: &SourceTable, hashes: &[String]) -> Result<()> {
        let placeholders: Vec<String> = (1..=hashes.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "DELETE FROM {} WHERE \"__hash\" IN ({})",
            Self::quoted(&table.name),
            placeholders.join(", ")
        );
        self.conn
            .execute(&sql, rusqlite::params_from_iter(hashes.iter()))?;
        Ok(())
    }
}
