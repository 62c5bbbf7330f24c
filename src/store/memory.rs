//! In-memory store for tests and single-run usage.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::Result;
use crate::store::KeyValueStore;

#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, HashMap<String, Value>> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, HashMap<String, Value>> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_guard().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.write_guard().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.write_guard().remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.read_guard().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_remove_roundtrip() {
        let store = MemoryStore::new();
        store.set("backup:p1", json!({"id": "p1"})).await.unwrap();
        assert_eq!(
            store.get("backup:p1").await.unwrap(),
            Some(json!({"id": "p1"}))
        );
        assert!(store.remove("backup:p1").await.unwrap());
        assert!(!store.remove("backup:p1").await.unwrap());
        assert_eq!(store.get("backup:p1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn keys_are_sorted() {
        let store = MemoryStore::new();
        store.set("b", json!(2)).await.unwrap();
        store.set("a", json!(1)).await.unwrap();
        store.set("c", json!(3)).await.unwrap();
        assert_eq!(store.keys().await.unwrap(), vec!["a", "b", "c"]);
    }
}
