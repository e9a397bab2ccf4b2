//! Notification badge counter.

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::records::RecordStore;

/// Record id of the badge counter.
pub const BADGE_COUNT_KEY: &str = "badge_count";

/// Count of unseen notifications, persisted as `{id: "badge_count", count}`.
///
/// Reads that fail return 0 and writes that fail are dropped, so callers
/// never have to handle storage errors. `increment` is read-then-write; the
/// worker runs one event handler at a time, so it does not race with itself.
#[derive(Clone)]
pub struct BadgeStore {
    records: Arc<RecordStore>,
}

impl BadgeStore {
    pub fn new(records: Arc<RecordStore>) -> Self {
        Self { records }
    }

    /// Create the schema and seed the counter with 0 if it has never been written.
    pub fn initialize(&self) {
        self.records.initialize();
        match self.records.get(BADGE_COUNT_KEY) {
            Ok(Some(_)) => {}
            Ok(None) => self.set(0),
            Err(e) => warn!(error = %e, "Badge store unavailable, counts default to 0"),
        }
    }

    /// Current count. 0 when absent, unreadable or corrupt.
    pub fn get(&self) -> u64 {
        match self.records.get(BADGE_COUNT_KEY) {
            Ok(Some(record)) => record.get("count").and_then(|c| c.as_u64()).unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                warn!(error = %e, "Badge count unreadable, using 0");
                0
            }
        }
    }

    /// Overwrite the count.
    pub fn set(&self, count: u64) {
        let record = json!({ "id": BADGE_COUNT_KEY, "count": count });
        match self.records.put(&record) {
            Ok(backend) => debug!(count, backend, "Badge count saved"),
            Err(e) => warn!(count, error = %e, "Badge count write dropped"),
        }
    }

    /// Add one and return the new count.
    pub fn increment(&self) -> u64 {
        let count = self.get().saturating_add(1);
        self.set(count);
        count
    }

    /// Reset to 0.
    pub fn clear(&self) {
        self.set(0);
    }
}
