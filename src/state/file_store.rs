use crate::state::{StateMap, StateStore};
use crate::Result;
use std::path::{Path, PathBuf};

/// File-backed state store: one `state_<key>.json` file per entity
#[derive(Debug)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Opens (creating if needed) a state directory
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn state_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("state_{}.json", key))
    }
}

impl StateStore for FileStateStore {
    fn load(&self, key: &str) -> Result<StateMap> {
        match std::fs::read_to_string(self.state_path(key)) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No saved state for '{}', starting fresh", key);
                Ok(StateMap::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn save(&mut self, key: &str, state: &StateMap) -> Result<()> {
        let content = serde_json::to_string(state)?;
        std::fs::write(self.state_path(key), content)?;
        Ok(())
    }
}
