//! Backend contract and the in-memory backend.

use hashbrown::HashMap;
use serde_json::Value as JsonValue;
use std::sync::Mutex;

use crate::{StoreError, StoreResult};

/// A keyed record store.
///
/// Backends are interchangeable: the record layer above them never knows
/// which one it is talking to.
pub trait StorageBackend: Send + Sync {
    /// Short backend name for log fields.
    fn name(&self) -> &'static str;

    /// Create tables or files if needed. Called before the first operation.
    fn ensure_schema(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Get a record by key.
    fn get(&self, key: &str) -> StoreResult<Option<JsonValue>>;

    /// Insert or overwrite a record.
    fn put(&self, key: &str, value: &JsonValue) -> StoreResult<()>;

    /// Delete a record. Returns whether it existed.
    fn delete(&self, key: &str) -> StoreResult<bool>;
}

/// Key path for records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath(String);

impl KeyPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extract the record key from a value.
    pub fn extract(&self, value: &JsonValue) -> StoreResult<String> {
        match value.get(&self.0) {
            Some(JsonValue::String(s)) => Ok(s.clone()),
            Some(JsonValue::Number(n)) => Ok(n.to_string()),
            Some(other) => Err(StoreError::DataError(format!(
                "Key `{}` must be a string or number, got {}",
                self.0, other
            ))),
            None => Err(StoreError::DataError(format!(
                "Could not extract key `{}` from value",
                self.0
            ))),
        }
    }
}

impl Default for KeyPath {
    fn default() -> Self {
        Self::new("id")
    }
}

// ==================== MemoryBackend ====================

/// Records kept in process memory. Lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<String, JsonValue>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count records.
    pub fn count(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> StoreResult<Option<JsonValue>> {
        let records = self
            .records
            .lock()
            .map_err(|_| StoreError::Poisoned("memory"))?;
        Ok(records.get(key).cloned())
    }

    fn put(&self, key: &str, value: &JsonValue) -> StoreResult<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| StoreError::Poisoned("memory"))?;
        records.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| StoreError::Poisoned("memory"))?;
        Ok(records.remove(key).is_some())
    }
}
