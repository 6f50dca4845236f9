use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use taskcell_core::{Error, Result};

use crate::MemoryAdapter;

/// File-backed memory adapter: one JSON file per `(scope, key)` under
/// `base_dir/scope/key.json`.
///
/// Writes go to a temporary file first and are renamed into place, so a
/// crash mid-write never leaves a corrupt value observable on the next
/// load.
pub struct FileMemory {
    base_dir: PathBuf,
}

/// Sanitize a scope or key for use as a file system name.
fn safe_name(name: &str) -> String {
    name.replace([':', '/', '\\'], "_")
}

impl FileMemory {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn scope_dir(&self, scope: &str) -> PathBuf {
        self.base_dir.join(safe_name(scope))
    }

    fn entry_path(&self, scope: &str, key: &str) -> PathBuf {
        self.scope_dir(scope).join(format!("{}.json", safe_name(key)))
    }

    fn read_entry(path: &Path) -> Result<Value> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::NotFound(format!("No value at {}", path.display()))
            }
            _ => Error::StorageUnavailable(format!("Failed to read {}: {}", path.display(), e)),
        })?;
        serde_json::from_str(&content).map_err(|e| {
            Error::Serialization(format!("Corrupt value at {}: {}", path.display(), e))
        })
    }
}

#[async_trait]
impl MemoryAdapter for FileMemory {
    async fn load(&self, scope: &str, key: &str) -> Result<Value> {
        let path = self.entry_path(scope, key);
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "Key '{}' not found in scope '{}'",
                key, scope
            )));
        }
        Self::read_entry(&path)
    }

    async fn save(&self, scope: &str, key: &str, value: &Value) -> Result<()> {
        let dir = self.scope_dir(scope);
        std::fs::create_dir_all(&dir).map_err(|e| {
            Error::StorageUnavailable(format!("Failed to create {}: {}", dir.display(), e))
        })?;

        let path = self.entry_path(scope, key);
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(value)
            .map_err(|e| Error::Serialization(format!("Failed to encode value: {}", e)))?;

        std::fs::write(&tmp_path, content).map_err(|e| {
            Error::StorageUnavailable(format!("Failed to write {}: {}", tmp_path.display(), e))
        })?;
        std::fs::rename(&tmp_path, &path).map_err(|e| {
            Error::StorageUnavailable(format!(
                "Failed to rename {} to {}: {}",
                tmp_path.display(),
                path.display(),
                e
            ))
        })?;

        debug!(scope, key, "Saved value");
        Ok(())
    }

    async fn delete(&self, scope: &str, key: &str) -> Result<()> {
        let path = self.entry_path(scope, key);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(scope, key, "Deleted value");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::StorageUnavailable(format!(
                "Failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn list_keys(&self, scope: &str) -> Result<Vec<String>> {
        let dir = self.scope_dir(scope);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&dir).map_err(|e| {
            Error::StorageUnavailable(format!("Failed to list {}: {}", dir.display(), e))
        })?;

        let mut keys = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
