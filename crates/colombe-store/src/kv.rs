//! Key-value file backend.
//!
//! The simplest persistent store there is: one JSON object mapping keys to
//! serialized records, rewritten whole on every change.

use serde_json::{Map, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::backend::StorageBackend;
use crate::{StoreError, StoreResult};

pub struct KvFileBackend {
    path: PathBuf,
    // Serializes read-modify-write cycles within the process.
    lock: Mutex<()>,
}

impl KvFileBackend {
    /// Use `path` as the store file. The parent directory is created if missing.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> StoreResult<Map<String, JsonValue>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(Map::new()),
            Ok(raw) => match serde_json::from_str(&raw)? {
                JsonValue::Object(map) => Ok(map),
                other => Err(StoreError::DataError(format!(
                    "{} does not hold a JSON object: {}",
                    self.path.display(),
                    other
                ))),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_map(&self, map: &Map<String, JsonValue>) -> StoreResult<()> {
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(map)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl StorageBackend for KvFileBackend {
    fn name(&self) -> &'static str {
        "kv"
    }

    fn get(&self, key: &str) -> StoreResult<Option<JsonValue>> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned("kv"))?;
        let map = self.read_map()?;
        match map.get(key) {
            // Values are stored as strings, the way a browser key-value store holds them
            Some(JsonValue::String(raw)) => Ok(Some(serde_json::from_str(raw)?)),
            Some(other) => Ok(Some(other.clone())),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: &JsonValue) -> StoreResult<()> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned("kv"))?;
        let mut map = self.read_map()?;
        map.insert(key.to_string(), JsonValue::String(serde_json::to_string(value)?));
        self.write_map(&map)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned("kv"))?;
        let mut map = self.read_map()?;
        let existed = map.remove(key).is_some();
        if existed {
            self.write_map(&map)?;
        }
        Ok(existed)
    }
}
