//! Update detection and propagation to open clients.

use colombe_common::UpdateConfig;
use std::cmp::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::host::{Client, ClientHost, ClientMatchOptions};
use crate::manifest::ManifestFetcher;
use crate::messages::{MandatoryNotice, OutboundMessage, UpdateInfo};
use crate::version::{compare_versions, VersionSnapshot, VersionStore};

/// Post `message` to each client. Failures are logged per client.
pub(crate) async fn broadcast(host: &dyn ClientHost, clients: &[Client], message: &OutboundMessage) {
    for client in clients {
        match host.post_message(&client.id, message).await {
            Ok(()) => debug!(client = %client.url, kind = message.kind(), "Message sent"),
            Err(e) => warn!(client = %client.url, kind = message.kind(), error = %e, "Message not delivered"),
        }
    }
}

/// Compares the published version against the running one and tells every
/// open client about a newer release.
pub struct UpdateBroadcaster {
    fetcher: Arc<ManifestFetcher>,
    clients: Arc<dyn ClientHost>,
    grace: Duration,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl UpdateBroadcaster {
    pub fn new(fetcher: Arc<ManifestFetcher>, clients: Arc<dyn ClientHost>, grace: Duration) -> Self {
        Self {
            fetcher,
            clients,
            grace,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Check the manifest. Returns whether a newer version was found; a
    /// failed check is logged and reported as no update.
    ///
    /// A mandatory update makes this worker skip waiting and claim clients
    /// at once, then posts `MANDATORY_UPDATE` after the grace delay.
    pub async fn check_for_updates(&self, snapshot: &VersionSnapshot) -> bool {
        debug!(current = %snapshot.version, "Checking for updates");

        let manifest = match self.fetcher.fetch().await {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(error = %e, category = e.category(), "Update check failed");
                return false;
            }
        };

        if compare_versions(&manifest.current_version, &snapshot.version) != Ordering::Greater {
            info!(version = %snapshot.version, "Application up to date");
            return false;
        }

        info!(
            current = %snapshot.version,
            available = %manifest.current_version,
            mandatory = manifest.mandatory,
            "New version available"
        );

        let clients = self.clients.match_all(&ClientMatchOptions::all_windows()).await;
        let update = OutboundMessage::UpdateAvailable {
            data: UpdateInfo {
                current_version: snapshot.version.clone(),
                new_version: manifest.current_version.clone(),
                changelog: manifest.changelog.clone(),
                mandatory: manifest.mandatory,
                release_date: manifest.release_date.clone(),
                timestamp: chrono::Utc::now().timestamp_millis(),
            },
        };
        broadcast(self.clients.as_ref(), &clients, &update).await;

        if manifest.mandatory {
            warn!(available = %manifest.current_version, "Mandatory update, taking over clients");
            if let Err(e) = self.clients.skip_waiting().await {
                warn!(error = %e, "skip_waiting failed");
            }
            if let Err(e) = self.clients.claim().await {
                warn!(error = %e, "claim failed");
            }

            let notice = OutboundMessage::MandatoryUpdate {
                data: MandatoryNotice {
                    current_version: snapshot.version.clone(),
                    new_version: manifest.current_version,
                    message: "Critical update required".to_string(),
                },
            };
            let host = self.clients.clone();
            let grace = self.grace;
            let handle = tokio::spawn(async move {
                time::sleep(grace).await;
                broadcast(host.as_ref(), &clients, &notice).await;
            });

            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.retain(|h| !h.is_finished());
            pending.push(handle);
        }

        true
    }
}

impl Drop for UpdateBroadcaster {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().unwrap_or_else(PoisonError::into_inner);
        for handle in pending.drain(..) {
            handle.abort();
        }
    }
}

/// Runs `check_for_updates` after an initial delay and then on a fixed
/// interval, until dropped.
pub struct UpdateScheduler {
    handle: JoinHandle<()>,
}

impl UpdateScheduler {
    /// Start checking. Each tick compares against the version `versions`
    /// holds at that moment.
    pub fn start(broadcaster: Arc<UpdateBroadcaster>, versions: Arc<VersionStore>, config: &UpdateConfig) -> Self {
        let start = Instant::now() + config.initial_delay();
        let period = config.interval();

        let handle = tokio::spawn(async move {
            let mut ticks = time::interval_at(start, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let snapshot = versions.snapshot().await;
                broadcaster.check_for_updates(&snapshot).await;
            }
        });

        info!(
            initial_delay_ms = config.initial_delay_ms,
            interval_ms = config.interval_ms,
            "Update checks scheduled"
        );
        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for UpdateScheduler {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
