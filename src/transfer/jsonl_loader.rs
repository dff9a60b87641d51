use crate::transfer::loader::{DestinationLoader, SourceTable, TransferRow};
use crate::Result;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Stage-file loader for directory-of-JSONL destinations
///
/// Each table becomes `<table>.jsonl` plus a `<table>.schema.json` sidecar
/// recording the column signature. Uploads are staged to a temporary file
/// first and then merged in one append, the same shape as warehouse
/// backends that require a stage + bulk load.
#[derive(Debug)]
pub struct JsonlLoader {
    dir: PathBuf,
    destination_id: String,
}

impl JsonlLoader {
    /// Whether this loader handles the destination URI
    pub fn supports(uri: &str) -> bool {
        uri.starts_with("file:") || uri.ends_with('/') || Path::new(uri).is_dir()
    }

    /// Opens (creating if needed) the destination directory
    pub fn open(uri: &str) -> Result<Self> {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        std::fs::create_dir_all(path)?;
        Ok(Self {
            dir: PathBuf::from(path),
            destination_id: uri.to_string(),
        })
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", table))
    }

    fn schema_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{}.schema.json", table))
    }

    fn stage_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{}.stage.jsonl", table))
    }

    fn row_to_json(table: &SourceTable, row: &TransferRow) -> Value {
        let mut object = serde_json::Map::new();
        for (column, value) in table.columns.iter().zip(&row.values) {
            let json = match value {
                SqlValue::Null => Value::Null,
                SqlValue::Integer(i) => Value::from(*i),
                SqlValue::Real(f) => serde_json::Number::from_f64(*f)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                SqlValue::Text(s) => Value::String(s.clone()),
                SqlValue::Blob(_) => Value::Null,
            };
            object.insert(column.name.clone(), json);
        }
        Value::Object(object)
    }
}

impl DestinationLoader for JsonlLoader {
    fn destination_id(&self) -> &str {
        &self.destination_id
    }

    fn table_matches(&mut self, table: &SourceTable) -> Result<bool> {
        let schema_path = self.schema_path(&table.name);
        if !schema_path.exists() || !self.table_path(&table.name).exists() {
            tracing::warn!("Table {} does not exist on destination", table.name);
            return Ok(false);
        }

        let recorded: Vec<(String, String)> =
            serde_json::from_str(&std::fs::read_to_string(schema_path)?)?;
        let same = recorded == table.column_signature();
        if !same {
            tracing::warn!(
                "Table {} has different columns in source and destination",
                table.name
            );
        }
        Ok(same)
    }

    fn recreate_table(&mut self, table: &SourceTable) -> Result<()> {
        std::fs::write(
            self.schema_path(&table.name),
            serde_json::to_string(&table.column_signature())?,
        )?;
        std::fs::write(self.table_path(&table.name), "")?;
        Ok(())
    }

    fn upload(&mut self, table: &SourceTable, rows: &[TransferRow]) -> Result<()> {
        // Stage the batch first, then merge it in a single append
        let stage_path = self.stage_path(&table.name);
        {
            let mut stage = std::fs::File::create(&stage_path)?;
            for row in rows {
                let line = serde_json::to_string(&Self::row_to_json(table, row))?;
                writeln!(stage, "{}", line)?;
            }
        }

        let staged = std::fs::read_to_string(&stage_path)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.table_path(&table.name))?;
        file.write_all(staged.as_bytes())?;

        std::fs::remove_file(&stage_path)?;
        Ok(())
    }

    fn remove(&mut self, table: &SourceTable, hashes: &[String]) -> Result<()> {
        let path = self.table_path(&table.name);
        let content = std::fs::read_to_string(&path)?;

        let mut kept = String::new();
        for line in content.lines() {
            if line.is_empty() {
                continue;
            }
            let row: Value = serde_json::from_str(line)?;
            let hash = row.get("__hash").and_then(Value::as_str).unwrap_or_default();
            if !hashes.iter().any(|h| h == hash) {
                kept.push_str(line);
                kept.push('\n');
            }
        }
        std::fs::write(path, kept)?;
        Ok(())
    }
}
