//! What the worker needs from its host: open clients and the OS
//! notification surface.

use async_trait::async_trait;
use colombe_common::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use url::Url;

use crate::messages::OutboundMessage;

// ==================== Clients ====================

/// An open application instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Whether this worker controls it.
    pub controlled: bool,
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

impl ClientType {
    /// Whether a client of type `other` is included by this filter.
    pub fn includes(self, other: ClientType) -> bool {
        self == ClientType::All || self == other
    }
}

/// Client match options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

impl ClientMatchOptions {
    /// Every window, controlled or not.
    pub fn all_windows() -> Self {
        Self {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        }
    }

    pub fn matches(&self, client: &Client) -> bool {
        (self.include_uncontrolled || client.controlled)
            && self.client_type.includes(client.client_type)
    }
}

/// Open clients and the worker's own lifecycle controls.
#[async_trait]
pub trait ClientHost: Send + Sync {
    /// Enumerate open clients.
    async fn match_all(&self, options: &ClientMatchOptions) -> Vec<Client>;

    /// Post a message to one client.
    async fn post_message(&self, client_id: &str, message: &OutboundMessage) -> Result<()>;

    /// Focus a window client.
    async fn focus(&self, client_id: &str) -> Result<Client>;

    /// Open a new window. `None` when the host opened nothing.
    async fn open_window(&self, url: &Url) -> Result<Option<Client>>;

    /// Take control of every client in scope.
    async fn claim(&self) -> Result<()>;

    /// Activate without waiting for old clients to close.
    async fn skip_waiting(&self) -> Result<()>;
}

// ==================== Notifications ====================

/// A button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// Display options for a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationOptions {
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// Notifications sharing a tag replace each other.
    pub tag: String,
    pub data: JsonValue,
    pub require_interaction: bool,
    /// Vibration pattern in milliseconds.
    pub vibrate: Vec<u32>,
    pub actions: Vec<NotificationAction>,
}

/// A displayed notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub options: NotificationOptions,
}

impl Notification {
    pub fn data(&self) -> &JsonValue {
        &self.options.data
    }

    pub fn tag(&self) -> &str {
        &self.options.tag
    }
}

/// The OS notification surface and application badge.
#[async_trait]
pub trait NotificationSurface: Send + Sync {
    async fn show(&self, notification: &Notification) -> Result<()>;

    async fn close(&self, notification: &Notification);

    async fn set_app_badge(&self, count: u64) -> Result<()>;

    async fn clear_app_badge(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(client_type: ClientType, controlled: bool) -> Client {
        Client {
            id: "c".into(),
            url: Url::parse("https://portal.example.org/parent.html").unwrap(),
            client_type,
            focused: false,
            controlled,
        }
    }

    #[test]
    fn test_match_options() {
        let all = ClientMatchOptions::all_windows();
        assert!(all.matches(&client(ClientType::Window, false)));
        assert!(!all.matches(&client(ClientType::Worker, true)));

        let controlled = ClientMatchOptions {
            include_uncontrolled: false,
            client_type: ClientType::All,
        };
        assert!(controlled.matches(&client(ClientType::Worker, true)));
        assert!(!controlled.matches(&client(ClientType::Window, false)));
    }
}
