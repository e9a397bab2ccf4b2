//! Push notifications: display, badge accounting and click routing.

use colombe_common::{NotificationConfig, Result};
use colombe_store::BadgeStore;
use serde_json::{json, Map, Value as JsonValue};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::host::{
    Client, ClientHost, ClientMatchOptions, Notification, NotificationAction, NotificationOptions,
    NotificationSurface,
};
use crate::messages::OutboundMessage;
use crate::updates::broadcast;

/// Notification types with their own icon variant.
const TYPED_ICONS: [&str; 5] = ["grades", "homework", "incidents", "presence", "communique"];

/// Actions that close a notification without opening anything.
const DISMISS_ACTIONS: [&str; 2] = ["dismiss", "close"];

/// A decoded push message.
#[derive(Debug, Clone, PartialEq)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub data: JsonValue,
    /// What clients receive in `BACKGROUND_NOTIFICATION`.
    pub raw: JsonValue,
}

impl PushPayload {
    /// Decode a push body; an empty body means the push carried no data.
    /// Anything that is not a JSON object becomes the body text under the
    /// default title.
    pub fn parse(bytes: &[u8], defaults: &NotificationConfig) -> Self {
        match serde_json::from_slice::<JsonValue>(bytes) {
            Ok(JsonValue::Object(payload)) => {
                let text = |field: &str| {
                    payload
                        .get("notification")
                        .and_then(|n| n.get(field))
                        .or_else(|| payload.get(field))
                        .and_then(|v| v.as_str())
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                };
                let data = match payload.get("data") {
                    Some(JsonValue::Object(data)) => JsonValue::Object(data.clone()),
                    _ => JsonValue::Object(Map::new()),
                };
                Self {
                    title: text("title").unwrap_or_else(|| defaults.default_title.clone()),
                    body: text("body").unwrap_or_else(|| defaults.default_body.clone()),
                    data,
                    raw: JsonValue::Object(payload),
                }
            }
            _ => {
                let text = String::from_utf8_lossy(bytes).trim().to_string();
                let body = if text.is_empty() {
                    defaults.default_body.clone()
                } else {
                    text
                };
                Self {
                    title: defaults.default_title.clone(),
                    raw: json!({ "title": defaults.default_title, "body": body }),
                    body,
                    data: JsonValue::Object(Map::new()),
                }
            }
        }
    }

    /// The notification type, if any.
    pub fn kind(&self) -> Option<&str> {
        self.data.get("type").and_then(|t| t.as_str())
    }
}

/// Result of a push event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Displayed { tag: String, badge_count: u64 },
    /// The surface refused the notification; nothing else happened.
    NotDisplayed,
}

/// Result of a notification click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    Dismissed,
    Focused { client_id: String, url: String },
    Opened { client_id: String, url: String },
    /// No window could be focused or opened.
    NoTarget,
}

/// Build the in-app deep link for notification data: the shell page with
/// `page`, `child`, `type` and `id` query parameters.
pub fn deep_link(shell: &Url, data: &JsonValue) -> Url {
    let mut url = shell.clone();
    url.set_query(None);
    url.set_fragment(None);

    let params: Vec<(&str, String)> = [("page", "page"), ("child", "childId"), ("type", "type"), ("id", "id")]
        .into_iter()
        .filter_map(|(param, field)| {
            let value = match data.get(field)? {
                JsonValue::String(s) if !s.is_empty() => s.clone(),
                JsonValue::Number(n) => n.to_string(),
                _ => return None,
            };
            Some((param, value))
        })
        .collect();

    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params);
    }
    url
}

/// Origin-relative form of a URL.
fn relative(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

pub struct NotificationDispatcher {
    surface: Arc<dyn NotificationSurface>,
    clients: Arc<dyn ClientHost>,
    badge: BadgeStore,
    config: NotificationConfig,
    origin: Url,
    shell: Url,
}

impl NotificationDispatcher {
    pub fn new(
        surface: Arc<dyn NotificationSurface>,
        clients: Arc<dyn ClientHost>,
        badge: BadgeStore,
        config: NotificationConfig,
        origin: Url,
        shell: Url,
    ) -> Self {
        Self {
            surface,
            clients,
            badge,
            config,
            origin,
            shell,
        }
    }

    pub fn badge(&self) -> &BadgeStore {
        &self.badge
    }

    /// Build the notification for `data`; `data.type` picks the icon and tag.
    pub fn template(&self, title: &str, body: &str, data: JsonValue) -> Notification {
        let kind = data.get("type").and_then(|t| t.as_str());
        let icon = match kind {
            Some(kind) if TYPED_ICONS.contains(&kind) => format!("{}?type={kind}", self.config.icon),
            _ => self.config.icon.clone(),
        };
        let tag = kind.filter(|k| !k.is_empty()).unwrap_or("general").to_string();

        Notification {
            title: title.to_string(),
            options: NotificationOptions {
                body: body.to_string(),
                icon,
                badge: self.config.badge_icon.clone(),
                tag,
                data,
                require_interaction: true,
                vibrate: vec![200, 100, 200, 100, 200],
                actions: vec![
                    NotificationAction {
                        action: "open".to_string(),
                        title: "Open".to_string(),
                    },
                    NotificationAction {
                        action: "dismiss".to_string(),
                        title: "Close".to_string(),
                    },
                ],
            },
        }
    }

    /// Count one more unseen notification and mirror it on the OS badge.
    async fn bump_badge(&self) -> u64 {
        let count = self.badge.increment();
        if let Err(e) = self.surface.set_app_badge(count).await {
            debug!(error = %e, "App badge not updated");
        }
        count
    }

    /// Reset the counter and the OS badge.
    pub async fn clear_badge(&self) -> Result<()> {
        self.badge.clear();
        self.surface.clear_app_badge().await
    }

    async fn windows(&self) -> Vec<Client> {
        self.clients.match_all(&ClientMatchOptions::all_windows()).await
    }

    async fn display(&self, notification: &Notification) -> Option<u64> {
        match self.surface.show(notification).await {
            Ok(()) => {
                let count = self.bump_badge().await;
                info!(title = %notification.title, tag = %notification.tag(), badge = count, "Notification displayed");
                Some(count)
            }
            Err(e) => {
                warn!(title = %notification.title, error = %e, "Notification display failed");
                None
            }
        }
    }

    /// Handle a push message.
    pub async fn on_push(&self, raw: &[u8]) -> PushOutcome {
        let payload = PushPayload::parse(raw, &self.config);
        debug!(kind = ?payload.kind(), "Push received");

        let notification = self.template(&payload.title, &payload.body, payload.data.clone());
        let Some(badge_count) = self.display(&notification).await else {
            return PushOutcome::NotDisplayed;
        };

        let clients = self.windows().await;
        broadcast(
            self.clients.as_ref(),
            &clients,
            &OutboundMessage::BackgroundNotification { data: payload.raw },
        )
        .await;

        PushOutcome::Displayed {
            tag: notification.options.tag,
            badge_count,
        }
    }

    /// Display a notification a client asked for.
    pub async fn show_from_client(&self, title: Option<String>, body: Option<String>, data: JsonValue) -> PushOutcome {
        let title = title.unwrap_or_else(|| self.config.default_title.clone());
        let body = body.unwrap_or_else(|| self.config.default_body.clone());
        let data = if data.is_object() { data } else { json!({}) };

        let notification = self.template(&title, &body, data.clone());
        let Some(badge_count) = self.display(&notification).await else {
            return PushOutcome::NotDisplayed;
        };

        let clients = self.windows().await;
        broadcast(
            self.clients.as_ref(),
            &clients,
            &OutboundMessage::NewNotification { data },
        )
        .await;

        PushOutcome::Displayed {
            tag: notification.options.tag,
            badge_count,
        }
    }

    /// Handle a click on `notification`, with the action button pressed, if any.
    pub async fn on_notification_click(&self, notification: &Notification, action: Option<&str>) -> ClickOutcome {
        self.surface.close(notification).await;

        if action.is_some_and(|a| DISMISS_ACTIONS.contains(&a)) {
            debug!(tag = %notification.tag(), "Notification dismissed");
            return ClickOutcome::Dismissed;
        }

        let target = deep_link(&self.shell, notification.data());
        let url = relative(&target);
        let message = OutboundMessage::NotificationClicked {
            data: notification.data().clone(),
            url: url.clone(),
        };
        info!(url = %url, "Opening notification target");

        let mut candidates: Vec<Client> = self
            .windows()
            .await
            .into_iter()
            .filter(|c| c.url.origin() == self.origin.origin())
            .collect();
        candidates.sort_by_key(|c| !c.focused);

        for candidate in candidates {
            match self.clients.focus(&candidate.id).await {
                Ok(client) => {
                    broadcast(self.clients.as_ref(), std::slice::from_ref(&client), &message).await;
                    self.clear_badge_after_open().await;
                    return ClickOutcome::Focused {
                        client_id: client.id,
                        url,
                    };
                }
                Err(e) => warn!(client = %candidate.url, error = %e, "Focus failed"),
            }
        }

        match self.clients.open_window(&target).await {
            Ok(Some(client)) => {
                tokio::time::sleep(self.config.open_window_settle()).await;
                broadcast(self.clients.as_ref(), std::slice::from_ref(&client), &message).await;
                self.clear_badge_after_open().await;
                ClickOutcome::Opened {
                    client_id: client.id,
                    url,
                }
            }
            Ok(None) => {
                warn!(url = %target, "No window opened");
                ClickOutcome::NoTarget
            }
            Err(e) => {
                warn!(url = %target, error = %e, "Opening window failed");
                ClickOutcome::NoTarget
            }
        }
    }

    async fn clear_badge_after_open(&self) {
        if let Err(e) = self.clear_badge().await {
            debug!(error = %e, "App badge not cleared");
        }
    }
}
