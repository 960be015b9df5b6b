//! File Store
//!
//! Persists state keys to a single JSON object on disk.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::{Map, Value};

use plugin_runtime::StateStore;

use crate::config::HostError;

/// JSON file backed [`StateStore`]
///
/// The whole file is rewritten on every save.
pub struct FileStore {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl FileStore {
    /// Open the store, reading existing values if the file exists
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, HostError> {
        let path = path.into();
        let values = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<Value>(&content)? {
                Value::Object(values) => values,
                _ => {
                    return Err(HostError::Invalid(format!(
                        "{} does not contain a JSON object",
                        path.display()
                    )));
                }
            }
        } else {
            Map::new()
        };

        tracing::debug!(path = %path.display(), keys = values.len(), "Opened state store");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStore {
    fn save(&self, key: &str, value: &Value) -> anyhow::Result<()> {
        let mut values = self.values.lock();
        values.insert(key.to_string(), value.clone());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&*values)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    fn load(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.values.lock().get(key).cloned())
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore").field("path", &self.path).finish()
    }
}
