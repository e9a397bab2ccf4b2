//! Record store with primary and fallback backends.

use colombe_common::{StoreBackendKind, StoreConfig};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::backend::{KeyPath, MemoryBackend, StorageBackend};
use crate::kv::KvFileBackend;
use crate::sqlite::SqliteBackend;
use crate::{StoreError, StoreResult};

/// Records keyed by their `id` field, written to the first backend that
/// accepts them.
pub struct RecordStore {
    primary: Option<Box<dyn StorageBackend>>,
    fallback: Option<Box<dyn StorageBackend>>,
    key_path: KeyPath,
}

impl RecordStore {
    /// Create a store from explicit backends.
    pub fn new(
        primary: Option<Box<dyn StorageBackend>>,
        fallback: Option<Box<dyn StorageBackend>>,
    ) -> Self {
        Self {
            primary,
            fallback,
            key_path: KeyPath::default(),
        }
    }

    /// A store that keeps everything in memory.
    pub fn in_memory() -> Self {
        Self::new(Some(Box::new(MemoryBackend::new())), None)
    }

    /// Open the configured backends. A backend that fails to open is
    /// logged and skipped; the store still works with whatever remains.
    pub fn open(config: &StoreConfig) -> Self {
        let primary: Option<Box<dyn StorageBackend>> = match config.backend {
            StoreBackendKind::Sqlite => match SqliteBackend::open(&config.path) {
                Ok(backend) => Some(Box::new(backend)),
                Err(e) => {
                    warn!(path = %config.path.display(), error = %e, "Embedded store unavailable, using key-value fallback");
                    None
                }
            },
            StoreBackendKind::Kv => match KvFileBackend::open(&config.path) {
                Ok(backend) => Some(Box::new(backend)),
                Err(e) => {
                    warn!(path = %config.path.display(), error = %e, "Key-value store unavailable");
                    None
                }
            },
            StoreBackendKind::Memory => Some(Box::new(MemoryBackend::new())),
        };

        let fallback: Option<Box<dyn StorageBackend>> =
            match KvFileBackend::open(&config.fallback_path) {
                Ok(backend) => Some(Box::new(backend)),
                Err(e) => {
                    warn!(path = %config.fallback_path.display(), error = %e, "Fallback store unavailable");
                    None
                }
            };

        info!(
            primary = primary.as_ref().map(|b| b.name()).unwrap_or("none"),
            fallback = fallback.as_ref().map(|b| b.name()).unwrap_or("none"),
            "Record store opened"
        );

        Self::new(primary, fallback)
    }

    fn backends(&self) -> impl Iterator<Item = &dyn StorageBackend> {
        self.primary
            .iter()
            .chain(self.fallback.iter())
            .map(|b| &**b)
    }

    /// Prepare the primary backend's schema. Failure is logged, not returned.
    pub fn initialize(&self) {
        if let Some(primary) = &self.primary {
            match primary.ensure_schema() {
                Ok(()) => debug!(backend = primary.name(), "Store schema ready"),
                Err(e) => warn!(backend = primary.name(), error = %e, "Store schema setup failed"),
            }
        }
    }

    /// Get a record. Errors only when every backend failed.
    pub fn get(&self, key: &str) -> StoreResult<Option<JsonValue>> {
        let mut last_error = None;
        for backend in self.backends() {
            match backend.get(key) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(backend = backend.name(), key, error = %e, "Store read failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(StoreError::Unavailable))
    }

    /// Write a record under its key path. Returns the backend that took it.
    pub fn put(&self, record: &JsonValue) -> StoreResult<&'static str> {
        let key = self.key_path.extract(record)?;
        let mut last_error = None;
        for backend in self.backends() {
            match backend.put(&key, record) {
                Ok(()) => return Ok(backend.name()),
                Err(e) => {
                    warn!(backend = backend.name(), key = %key, error = %e, "Store write failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(StoreError::Unavailable))
    }

    /// Delete a record from the first backend that answers.
    pub fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut last_error = None;
        for backend in self.backends() {
            match backend.delete(key) {
                Ok(existed) => return Ok(existed),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or(StoreError::Unavailable))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    /// A backend that refuses every operation, like a disabled embedded store.
    pub(crate) struct BrokenBackend;

    impl StorageBackend for BrokenBackend {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn get(&self, _key: &str) -> StoreResult<Option<JsonValue>> {
            Err(StoreError::Unavailable)
        }

        fn put(&self, _key: &str, _value: &JsonValue) -> StoreResult<()> {
            Err(StoreError::Unavailable)
        }

        fn delete(&self, _key: &str) -> StoreResult<bool> {
            Err(StoreError::Unavailable)
        }
    }

    #[test]
    fn test_put_uses_primary() {
        let store = RecordStore::in_memory();
        let used = store.put(&json!({"id": "badge_count", "count": 1})).unwrap();
        assert_eq!(used, "memory");
        assert_eq!(store.get("badge_count").unwrap().unwrap()["count"], 1);
    }

    #[test]
    fn test_falls_back_when_primary_broken() {
        let store = RecordStore::new(
            Some(Box::new(BrokenBackend)),
            Some(Box::new(MemoryBackend::new())),
        );
        let used = store.put(&json!({"id": "badge_count", "count": 5})).unwrap();
        assert_eq!(used, "memory");
        assert_eq!(store.get("badge_count").unwrap().unwrap()["count"], 5);
    }

    #[test]
    fn test_all_backends_broken() {
        let store = RecordStore::new(Some(Box::new(BrokenBackend)), None);
        assert!(store.get("badge_count").is_err());
        assert!(store.put(&json!({"id": "badge_count", "count": 1})).is_err());

        let empty = RecordStore::new(None, None);
        assert!(matches!(empty.get("x"), Err(StoreError::Unavailable)));
    }

    #[test]
    fn test_record_without_key_rejected() {
        let store = RecordStore::in_memory();
        assert!(matches!(
            store.put(&json!({"count": 1})),
            Err(StoreError::DataError(_))
        ));
    }

    #[test]
    fn test_open_from_config() {
        let dir = tempdir().unwrap();
        let config = StoreConfig {
            backend: StoreBackendKind::Sqlite,
            path: dir.path().join("NotificationDB.sqlite"),
            fallback_path: dir.path().join("badge.json"),
        };
        let store = RecordStore::open(&config);
        store.initialize();
        assert_eq!(store.put(&json!({"id": "a"})).unwrap(), "sqlite");
    }
}
