//! SQLite object store backend.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

use crate::backend::StorageBackend;
use crate::{now_millis, StoreError, StoreResult};

/// Database schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Records stored as JSON text in a single SQLite table.
///
/// The schema is created lazily, on the first operation after opening.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    schema_ready: AtomicBool,
}

impl SqliteBackend {
    /// Open or create the database file.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "Opened SQLite store");
        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            schema_ready: AtomicBool::new(false),
        }
    }

    fn with_conn<R>(&self, f: impl FnOnce(&Connection) -> StoreResult<R>) -> StoreResult<R> {
        self.ensure_schema()?;
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned("sqlite"))?;
        f(&conn)
    }
}

/// Create the records table if this database has never been used.
fn create_schema(conn: &Connection) -> StoreResult<()> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );
        "#,
    )?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    debug!(version = SCHEMA_VERSION, "Created store schema");
    Ok(())
}

impl StorageBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn ensure_schema(&self) -> StoreResult<()> {
        if self.schema_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned("sqlite"))?;
        create_schema(&conn)?;
        self.schema_ready.store(true, Ordering::Release);
        Ok(())
    }

    fn get(&self, key: &str) -> StoreResult<Option<JsonValue>> {
        self.with_conn(|conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT value FROM records WHERE id = ?",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            match raw {
                Some(text) => Ok(Some(serde_json::from_str(&text)?)),
                None => Ok(None),
            }
        })
    }

    fn put(&self, key: &str, value: &JsonValue) -> StoreResult<()> {
        let text = serde_json::to_string(value)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO records (id, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, text, now_millis()],
            )?;
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM records WHERE id = ?", params![key])?;
            Ok(removed > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_lazy_schema() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        assert!(!backend.schema_ready.load(Ordering::Acquire));

        assert!(backend.get("badge_count").unwrap().is_none());
        assert!(backend.schema_ready.load(Ordering::Acquire));
    }

    #[test]
    fn test_put_overwrites() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .put("badge_count", &json!({"id": "badge_count", "count": 1}))
            .unwrap();
        backend
            .put("badge_count", &json!({"id": "badge_count", "count": 4}))
            .unwrap();

        let record = backend.get("badge_count").unwrap().unwrap();
        assert_eq!(record["count"], 4);
    }

    #[test]
    fn test_delete() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.put("k", &json!({"id": "k"})).unwrap();
        assert!(backend.delete("k").unwrap());
        assert!(!backend.delete("k").unwrap());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("NotificationDB.sqlite");

        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend
                .put("parent_data", &json!({"id": "parent_data", "data": {"name": "A"}}))
                .unwrap();
        }

        let reopened = SqliteBackend::open(&path).unwrap();
        let record = reopened.get("parent_data").unwrap().unwrap();
        assert_eq!(record["data"]["name"], "A");
    }
}
