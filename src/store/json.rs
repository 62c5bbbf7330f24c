//! File-backed store: one pretty-printed JSON document per key.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{GovernanceError, Result};
use crate::hash::fingerprint;
use crate::store::KeyValueStore;

/// On-disk document wrapper. The original key is stored inside the file so
/// `keys()` does not have to reverse the filename sanitization.
#[derive(Serialize, Deserialize)]
struct StoredRecord {
    key: String,
    value: Value,
}

/// Key-value store persisting each record as a JSON file under one directory.
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create store directory {}", root.display()))
            .map_err(GovernanceError::storage)?;
        Ok(Self { root })
    }

    /// Filename for `key`: sanitized key plus a short key fingerprint, so
    /// distinct keys that sanitize identically still get distinct files.
    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root
            .join(format!("{}-{}.json", safe, &fingerprint(key)[..8]))
    }

    fn read_record(&self, path: &PathBuf) -> anyhow::Result<StoredRecord> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read store file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse store file {}", path.display()))
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let record = self
            .read_record(&path)
            .map_err(GovernanceError::storage)?;
        Ok(Some(record.value))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let record = StoredRecord {
            key: key.to_string(),
            value,
        };
        let json = serde_json::to_string_pretty(&record)
            .context("Failed to serialize store record")
            .map_err(GovernanceError::storage)?;
        fs::write(self.path_for(key), json)
            .with_context(|| format!("Failed to write store record for key '{key}'"))
            .map_err(GovernanceError::storage)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)
            .with_context(|| format!("Failed to remove store file {}", path.display()))
            .map_err(GovernanceError::storage)?;
        Ok(true)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("Failed to list store directory {}", self.root.display()))
            .map_err(GovernanceError::storage)?;

        let mut keys = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let record = self.read_record(&path).map_err(GovernanceError::storage)?;
                keys.push(record.key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
