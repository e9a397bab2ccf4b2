//! Hosts for a worker running outside a browser: there are no windows, and
//! notifications go to the log.

use async_trait::async_trait;
use colombe_common::{ColombeError, Result};
use colombe_sw::{Client, ClientHost, ClientMatchOptions, Notification, NotificationSurface, OutboundMessage};
use tracing::{debug, info};
use url::Url;

/// A client host with no open clients.
pub struct HeadlessClients;

#[async_trait]
impl ClientHost for HeadlessClients {
    async fn match_all(&self, _options: &ClientMatchOptions) -> Vec<Client> {
        Vec::new()
    }

    async fn post_message(&self, client_id: &str, message: &OutboundMessage) -> Result<()> {
        debug!(client_id, kind = message.kind(), "Message dropped, no clients");
        Ok(())
    }

    async fn focus(&self, client_id: &str) -> Result<Client> {
        Err(ColombeError::InvalidArgument(format!("no client {client_id}")))
    }

    async fn open_window(&self, url: &Url) -> Result<Option<Client>> {
        info!(url = %url, "Would open window");
        Ok(None)
    }

    async fn claim(&self) -> Result<()> {
        debug!("Clients claimed");
        Ok(())
    }

    async fn skip_waiting(&self) -> Result<()> {
        debug!("Skipped waiting");
        Ok(())
    }
}

/// Writes notifications to the log.
pub struct LogSurface;

#[async_trait]
impl NotificationSurface for LogSurface {
    async fn show(&self, notification: &Notification) -> Result<()> {
        info!(
            title = %notification.title,
            body = %notification.options.body,
            tag = %notification.tag(),
            "Notification"
        );
        Ok(())
    }

    async fn close(&self, notification: &Notification) {
        debug!(tag = %notification.tag(), "Notification closed");
    }

    async fn set_app_badge(&self, count: u64) -> Result<()> {
        info!(count, "App badge");
        Ok(())
    }

    async fn clear_app_badge(&self) -> Result<()> {
        info!("App badge cleared");
        Ok(())
    }
}
