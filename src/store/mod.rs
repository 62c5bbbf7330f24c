//! Durable key-value storage behind the snapshot store.

mod json;
mod memory;

pub use json::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::Result;

/// Durable key-value storage for backup and configuration records.
///
/// Values are opaque structured JSON. Absent keys read as `Ok(None)`; only
/// genuine storage faults are errors.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    /// Remove `key`, reporting whether it existed.
    async fn remove(&self, key: &str) -> Result<bool>;
    async fn keys(&self) -> Result<Vec<String>>;
}
