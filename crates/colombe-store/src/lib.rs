//! # Colombe Store
//!
//! A small embedded object store for worker state that must survive
//! restarts: the notification badge count and the parent data record.
//!
//! ## Architecture
//!
//! ```text
//! BadgeStore / ParentDataStore
//!     │
//!     └── RecordStore (records keyed by the `id` field)
//!             ├── primary:  SqliteBackend | KvFileBackend | MemoryBackend
//!             └── fallback: KvFileBackend
//! ```
//!
//! Every write goes to the primary backend first and falls back to the
//! key-value file when the primary is unavailable. When both fail, reads
//! return defaults and writes are dropped.

use colombe_common::ColombeError;
use thiserror::Error;

pub mod backend;
pub mod badge;
pub mod kv;
pub mod parent;
pub mod records;
pub mod sqlite;

pub use backend::{KeyPath, MemoryBackend, StorageBackend};
pub use badge::{BadgeStore, BADGE_COUNT_KEY};
pub use kv::KvFileBackend;
pub use parent::{ParentDataStore, PARENT_DATA_KEY};
pub use records::RecordStore;
pub use sqlite::SqliteBackend;

// ==================== Errors ====================

/// Store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Lock poisoned: {0}")]
    Poisoned(&'static str),

    #[error("No storage backend available")]
    Unavailable,
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for ColombeError {
    fn from(err: StoreError) -> Self {
        ColombeError::store(err.to_string())
    }
}

/// Milliseconds since the epoch, for record timestamps.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
