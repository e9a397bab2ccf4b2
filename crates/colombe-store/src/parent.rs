//! Parent profile snapshot kept for offline notifications.

use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::info;

use crate::records::RecordStore;
use crate::{now_millis, StoreResult};

/// Record id of the parent data snapshot.
pub const PARENT_DATA_KEY: &str = "parent_data";

/// Stores `{id: "parent_data", data, timestamp}` next to the badge counter.
#[derive(Clone)]
pub struct ParentDataStore {
    records: Arc<RecordStore>,
}

impl ParentDataStore {
    pub fn new(records: Arc<RecordStore>) -> Self {
        Self { records }
    }

    /// Save the snapshot, stamped with the current time.
    pub fn save(&self, data: JsonValue) -> StoreResult<()> {
        let record = json!({
            "id": PARENT_DATA_KEY,
            "data": data,
            "timestamp": now_millis(),
        });
        let backend = self.records.put(&record)?;
        info!(backend, "Parent data saved");
        Ok(())
    }

    /// Load the last saved snapshot and its timestamp.
    pub fn load(&self) -> StoreResult<Option<(JsonValue, i64)>> {
        Ok(self.records.get(PARENT_DATA_KEY)?.map(|record| {
            let timestamp = record.get("timestamp").and_then(|t| t.as_i64()).unwrap_or(0);
            let data = record.get("data").cloned().unwrap_or(JsonValue::Null);
            (data, timestamp)
        }))
    }
}
