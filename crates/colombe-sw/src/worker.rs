//! The worker: lifecycle state and event dispatch.

use bytes::Bytes;
use colombe_common::{Result, WorkerConfig};
use colombe_store::{BadgeStore, ParentDataStore, RecordStore};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheGenerations, PopulateReport, SharedCacheStorage};
use crate::host::{ClientHost, ClientMatchOptions, Notification, NotificationSurface};
use crate::manifest::ManifestFetcher;
use crate::messages::{InboundMessage, OutboundMessage};
use crate::net::{Network, Request};
use crate::notify::{ClickOutcome, NotificationDispatcher, PushOutcome};
use crate::router::{RequestRouter, RouteClass, RouteOutcome, RouterConfig};
use crate::updates::{broadcast, UpdateBroadcaster, UpdateScheduler};
use crate::version::{VersionSnapshot, VersionStore};

/// Background sync tag that replays missed notifications.
pub const SYNC_NOTIFICATIONS: &str = "sync-notifications";

/// Periodic sync tag that runs an update check.
pub const PERIODIC_UPDATE_CHECK: &str = "update-check";

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceWorkerState {
    #[default]
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// Replaced by a newer worker.
    Redundant,
}

/// The host services a worker runs against. Caches and records outlive any
/// one worker: a replacement instance built on the same host sees them.
#[derive(Clone)]
pub struct WorkerHost {
    pub network: Arc<dyn Network>,
    pub clients: Arc<dyn ClientHost>,
    pub surface: Arc<dyn NotificationSurface>,
    pub records: Arc<RecordStore>,
    pub caches: SharedCacheStorage,
}

/// An event delivered by the host.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    /// Push message body; empty when the push carried no data.
    Push(Bytes),
    NotificationClick {
        notification: Notification,
        action: Option<String>,
    },
    /// A message posted by a client.
    Message(JsonValue),
    Sync(String),
    PeriodicSync(String),
}

impl WorkerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerEvent::Install => "install",
            WorkerEvent::Activate => "activate",
            WorkerEvent::Fetch(_) => "fetch",
            WorkerEvent::Push(_) => "push",
            WorkerEvent::NotificationClick { .. } => "notificationclick",
            WorkerEvent::Message(_) => "message",
            WorkerEvent::Sync(_) => "sync",
            WorkerEvent::PeriodicSync(_) => "periodicsync",
        }
    }
}

/// What handling an event produced.
#[derive(Debug)]
pub enum EventResult {
    Installed(PopulateReport),
    Activated,
    Fetch(RouteOutcome),
    Push(PushOutcome),
    Click(ClickOutcome),
    /// Reply for the message port, if the message gets one.
    Reply(Option<JsonValue>),
    /// Sync and periodic sync events.
    Done,
}

/// An offline worker instance.
pub struct ServiceWorker {
    config: WorkerConfig,
    state: RwLock<ServiceWorkerState>,
    versions: Arc<VersionStore>,
    generations: CacheGenerations,
    router: RequestRouter,
    broadcaster: Arc<UpdateBroadcaster>,
    dispatcher: NotificationDispatcher,
    parent_data: ParentDataStore,
    clients: Arc<dyn ClientHost>,
    surface: Arc<dyn NotificationSurface>,
    static_assets: Vec<Url>,
    scheduler: Mutex<Option<UpdateScheduler>>,
}

impl ServiceWorker {
    /// Build a worker. Fails only on invalid configuration.
    pub fn new(config: WorkerConfig, host: WorkerHost) -> Result<Self> {
        config.validate()?;

        let fetcher = Arc::new(ManifestFetcher::new(host.network.clone(), config.manifest_url()?));
        let versions = Arc::new(VersionStore::new(
            config.cache_prefix.clone(),
            &config.default_version,
            fetcher.clone(),
        ));
        let generations = CacheGenerations::shared(host.caches.clone(), host.network.clone());
        let router = RequestRouter::new(
            RouterConfig::from_config(&config)?,
            generations.clone(),
            host.network.clone(),
        );
        let broadcaster = Arc::new(UpdateBroadcaster::new(
            fetcher,
            host.clients.clone(),
            config.update.mandatory_grace(),
        ));
        let badge = BadgeStore::new(host.records.clone());
        let dispatcher = NotificationDispatcher::new(
            host.surface.clone(),
            host.clients.clone(),
            badge,
            config.notifications.clone(),
            config.origin.clone(),
            config.resolve(&config.offline_shell)?,
        );
        let static_assets = config
            .static_assets
            .iter()
            .map(|asset| config.resolve(asset))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            parent_data: ParentDataStore::new(host.records),
            versions,
            generations,
            router,
            broadcaster,
            dispatcher,
            clients: host.clients,
            surface: host.surface,
            static_assets,
            scheduler: Mutex::new(None),
            state: RwLock::new(ServiceWorkerState::Parsed),
            config,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub async fn state(&self) -> ServiceWorkerState {
        *self.state.read().await
    }

    async fn set_state(&self, state: ServiceWorkerState) {
        let mut current = self.state.write().await;
        debug!(from = ?*current, to = ?state, "Worker state change");
        *current = state;
    }

    /// Current version snapshot.
    pub async fn snapshot(&self) -> Arc<VersionSnapshot> {
        self.versions.snapshot().await
    }

    pub fn badge(&self) -> &BadgeStore {
        self.dispatcher.badge()
    }

    /// Names of every cache bucket.
    pub async fn cache_names(&self) -> Vec<String> {
        self.generations.names().await
    }

    /// Classify a request without handling it.
    pub fn classify(&self, request: &Request) -> RouteClass {
        self.router.classify(request)
    }

    /// Handle one event. Never fails: every external failure degrades.
    pub async fn dispatch(&self, event: WorkerEvent) -> EventResult {
        debug!(event = event.name(), "Dispatching event");
        match event {
            WorkerEvent::Install => EventResult::Installed(self.install().await),
            WorkerEvent::Activate => {
                self.activate().await;
                EventResult::Activated
            }
            WorkerEvent::Fetch(request) => EventResult::Fetch(self.fetch(&request).await),
            WorkerEvent::Push(body) => EventResult::Push(self.dispatcher.on_push(&body).await),
            WorkerEvent::NotificationClick {
                notification,
                action,
            } => EventResult::Click(
                self.dispatcher
                    .on_notification_click(&notification, action.as_deref())
                    .await,
            ),
            WorkerEvent::Message(message) => {
                EventResult::Reply(self.on_message(InboundMessage::parse(&message)).await)
            }
            WorkerEvent::Sync(tag) => {
                if tag == SYNC_NOTIFICATIONS {
                    info!(tag = %tag, "Notification sync complete");
                } else {
                    debug!(tag = %tag, "Unhandled sync tag");
                }
                EventResult::Done
            }
            WorkerEvent::PeriodicSync(tag) => {
                if tag == PERIODIC_UPDATE_CHECK {
                    self.check_for_updates().await;
                } else {
                    debug!(tag = %tag, "Unhandled periodic sync tag");
                }
                EventResult::Done
            }
        }
    }

    /// Read the version, populate its generation, then skip waiting. Cache
    /// failures are logged and installation still completes.
    pub async fn install(&self) -> PopulateReport {
        self.set_state(ServiceWorkerState::Installing).await;
        let snapshot = self.versions.initialize().await;
        info!(version = %snapshot.version, cache = %snapshot.cache_name, "Installing");

        let report = match self.generations.populate(&snapshot, &self.static_assets).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Install cache unavailable, continuing without offline assets");
                PopulateReport {
                    cached: 0,
                    failed: self.static_assets.iter().map(Url::to_string).collect(),
                }
            }
        };

        if let Err(e) = self.clients.skip_waiting().await {
            warn!(error = %e, "skip_waiting failed");
        }
        self.set_state(ServiceWorkerState::Installed).await;
        report
    }

    /// Claim clients, prepare the badge store, sweep old generations and
    /// start the update checks.
    pub async fn activate(&self) {
        self.set_state(ServiceWorkerState::Activating).await;
        let snapshot = self.versions.initialize().await;

        if let Err(e) = self.clients.claim().await {
            warn!(error = %e, "claim failed");
        }
        self.badge().initialize();

        match self.generations.sweep(&snapshot).await {
            Ok(deleted) => debug!(deleted = deleted.len(), "Generations swept"),
            Err(e) => warn!(error = %e, "Generation sweep failed"),
        }

        let scheduler = UpdateScheduler::start(self.broadcaster.clone(), self.versions.clone(), &self.config.update);
        if let Some(previous) = self.scheduler.lock().await.replace(scheduler) {
            previous.stop();
        }

        let clients = self.clients.match_all(&ClientMatchOptions::all_windows()).await;
        broadcast(
            self.clients.as_ref(),
            &clients,
            &OutboundMessage::ServiceWorkerActive {
                version: snapshot.version.clone(),
            },
        )
        .await;

        self.set_state(ServiceWorkerState::Activated).await;
        info!(version = %snapshot.version, clients = clients.len(), "Activation complete");
    }

    /// Route a request. Only an activated worker intercepts.
    pub async fn fetch(&self, request: &Request) -> RouteOutcome {
        if self.state().await != ServiceWorkerState::Activated {
            return RouteOutcome::Passthrough;
        }
        let snapshot = self.snapshot().await;
        self.router.handle(&snapshot, request).await
    }

    /// Run an update check now.
    pub async fn check_for_updates(&self) -> bool {
        let snapshot = self.snapshot().await;
        self.broadcaster.check_for_updates(&snapshot).await
    }

    /// Mark this worker replaced and stop its timers.
    pub async fn retire(&self) {
        if let Some(scheduler) = self.scheduler.lock().await.take() {
            scheduler.stop();
        }
        self.set_state(ServiceWorkerState::Redundant).await;
        info!("Worker retired");
    }

    async fn take_over(&self) -> Result<()> {
        self.clients.skip_waiting().await?;
        self.clients.claim().await
    }

    async fn on_message(&self, message: InboundMessage) -> Option<JsonValue> {
        debug!(message = ?message, "Client message");
        let now = chrono::Utc::now().timestamp_millis();

        match message {
            InboundMessage::CheckForUpdates | InboundMessage::UpdateAvailable => {
                let has_update = self.check_for_updates().await;
                let snapshot = self.snapshot().await;
                Some(json!({ "hasUpdate": has_update, "currentVersion": snapshot.version }))
            }
            InboundMessage::GetVersion => {
                let snapshot = self.snapshot().await;
                Some(json!({
                    "version": snapshot.version,
                    "cacheName": snapshot.cache_name,
                    "timestamp": now,
                }))
            }
            InboundMessage::ForceUpdate => {
                let snapshot = self.snapshot().await;
                Some(match self.take_over().await {
                    Ok(()) => json!({
                        "success": true,
                        "message": "Service worker updated",
                        "newVersion": snapshot.version,
                    }),
                    Err(e) => json!({ "success": false, "message": e.to_string() }),
                })
            }
            InboundMessage::ClearCache => {
                let snapshot = self.snapshot().await;
                Some(match self.generations.delete(&snapshot.cache_name).await {
                    Ok(_) => {
                        info!(cache = %snapshot.cache_name, "Cache cleared");
                        json!({ "success": true, "message": "Cache cleared" })
                    }
                    Err(e) => json!({ "success": false, "message": e.to_string() }),
                })
            }
            InboundMessage::ClearBadge => {
                if let Err(e) = self.dispatcher.clear_badge().await {
                    debug!(error = %e, "App badge not cleared");
                }
                Some(json!({ "success": true, "message": "Badge cleared" }))
            }
            InboundMessage::GetBadgeCount => Some(json!({ "count": self.badge().get(), "success": true })),
            InboundMessage::SetBadgeCount { count: Some(count) } => {
                self.badge().set(count);
                if let Err(e) = self.surface.set_app_badge(count).await {
                    debug!(error = %e, "App badge not updated");
                }
                Some(json!({ "success": true, "message": format!("Badge updated: {count}") }))
            }
            InboundMessage::SetBadgeCount { count: None } => Some(json!({
                "success": false,
                "message": "count must be a non-negative integer",
            })),
            InboundMessage::Ping => {
                let snapshot = self.snapshot().await;
                Some(json!({
                    "pong": true,
                    "version": snapshot.version,
                    "timestamp": now,
                    "badgeCount": self.badge().get(),
                }))
            }
            InboundMessage::SaveParentData { data: Some(data) } => Some(match self.parent_data.save(data) {
                Ok(()) => json!({ "success": true, "message": "Parent data saved" }),
                Err(e) => {
                    warn!(error = %e, "Parent data not saved");
                    json!({ "success": false, "message": e.to_string() })
                }
            }),
            InboundMessage::SaveParentData { data: None } => {
                Some(json!({ "success": false, "message": "no data" }))
            }
            InboundMessage::CheckNow => self
                .check_for_updates()
                .await
                .then(|| json!({ "hasUpdate": true, "message": "Update detected" })),
            InboundMessage::SkipWaiting => {
                let success = match self.clients.skip_waiting().await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, "skip_waiting failed");
                        false
                    }
                };
                Some(json!({ "success": success }))
            }
            InboundMessage::ShowNotification { title, body, data } => {
                self.dispatcher.show_from_client(title, body, data).await;
                None
            }
            InboundMessage::Unknown(kind) => {
                debug!(kind = %kind, "Unknown message type ignored");
                None
            }
        }
    }
}

impl std::fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("origin", &self.config.origin.as_str())
            .field("static_assets", &self.static_assets.len())
            .finish_non_exhaustive()
    }
}
