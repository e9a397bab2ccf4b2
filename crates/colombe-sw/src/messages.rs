//! Messages exchanged with open clients.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==================== Worker → client ====================

/// Payload of `UPDATE_AVAILABLE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfo {
    pub current_version: String,
    pub new_version: String,
    pub changelog: String,
    pub mandatory: bool,
    pub release_date: Option<String>,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
}

/// Payload of `MANDATORY_UPDATE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MandatoryNotice {
    pub current_version: String,
    pub new_version: String,
    pub message: String,
}

/// A message posted to a client. Serializes as `{"type": "...", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    UpdateAvailable { data: UpdateInfo },
    MandatoryUpdate { data: MandatoryNotice },
    ServiceWorkerActive { version: String },
    BackgroundNotification { data: JsonValue },
    NotificationClicked { data: JsonValue, url: String },
    NewNotification { data: JsonValue },
}

impl OutboundMessage {
    /// Wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::UpdateAvailable { .. } => "UPDATE_AVAILABLE",
            OutboundMessage::MandatoryUpdate { .. } => "MANDATORY_UPDATE",
            OutboundMessage::ServiceWorkerActive { .. } => "SERVICE_WORKER_ACTIVE",
            OutboundMessage::BackgroundNotification { .. } => "BACKGROUND_NOTIFICATION",
            OutboundMessage::NotificationClicked { .. } => "NOTIFICATION_CLICKED",
            OutboundMessage::NewNotification { .. } => "NEW_NOTIFICATION",
        }
    }
}

// ==================== Client → worker ====================

/// A message received from a client.
///
/// Clients send `{type, data?}`; fields the worker needs are pulled out of
/// `data` here so handlers never touch raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    CheckForUpdates,
    GetVersion,
    ForceUpdate,
    ClearCache,
    ClearBadge,
    GetBadgeCount,
    /// `None` when the count is missing, negative or not an integer.
    SetBadgeCount { count: Option<u64> },
    Ping,
    SaveParentData { data: Option<JsonValue> },
    CheckNow,
    SkipWaiting,
    /// A client relaying that it saw an update.
    UpdateAvailable,
    ShowNotification {
        title: Option<String>,
        body: Option<String>,
        data: JsonValue,
    },
    /// Anything else, including messages without a type.
    Unknown(String),
}

impl InboundMessage {
    /// Interpret a posted message.
    pub fn parse(message: &JsonValue) -> Self {
        let kind = message.get("type").and_then(|t| t.as_str()).unwrap_or_default();
        let data = message.get("data");

        match kind {
            "CHECK_FOR_UPDATES" => Self::CheckForUpdates,
            "GET_VERSION" => Self::GetVersion,
            "FORCE_UPDATE" => Self::ForceUpdate,
            "CLEAR_CACHE" => Self::ClearCache,
            "CLEAR_BADGE" => Self::ClearBadge,
            "GET_BADGE_COUNT" => Self::GetBadgeCount,
            "SET_BADGE_COUNT" => Self::SetBadgeCount {
                count: data
                    .and_then(|d| d.get("count"))
                    .or_else(|| message.get("count"))
                    .and_then(|c| c.as_u64()),
            },
            "PING" => Self::Ping,
            "SAVE_PARENT_DATA" => Self::SaveParentData {
                data: data.filter(|d| !d.is_null()).cloned(),
            },
            "CHECK_NOW" => Self::CheckNow,
            "SKIP_WAITING" => Self::SkipWaiting,
            "UPDATE_AVAILABLE" => Self::UpdateAvailable,
            "SHOW_NOTIFICATION" => {
                let text = |field: &str| {
                    data.and_then(|d| d.get(field))
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                };
                Self::ShowNotification {
                    title: text("title"),
                    body: text("body"),
                    data: data
                        .and_then(|d| d.pointer("/options/data"))
                        .cloned()
                        .unwrap_or(JsonValue::Null),
                }
            }
            other => Self::Unknown(other.to_string()),
        }
    }
}
