//! # Colombe Service Worker
//!
//! Offline support and push notifications for the Colombe parent portal.
//!
//! ## Features
//!
//! - **Versioned caches**: one generation per release, older ones swept at activation
//! - **Routing**: network-first for documents and the manifest, cache-first for assets
//! - **Update propagation**: periodic manifest checks, `UPDATE_AVAILABLE` and
//!   `MANDATORY_UPDATE` broadcasts to open clients
//! - **Notifications**: push display, badge counting, click-to-deep-link
//! - **Client messages**: version, badge and cache controls over the message channel
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorker (dispatch: install, activate, fetch, push, click, message, sync)
//!     │
//!     ├── VersionStore ── ManifestFetcher ── Network
//!     ├── RequestRouter ── CacheGenerations ── CacheStorage
//!     ├── UpdateBroadcaster / UpdateScheduler ── ClientHost
//!     └── NotificationDispatcher ── NotificationSurface, BadgeStore
//! ```
//!
//! The host supplies a [`Network`], a [`ClientHost`] and a
//! [`NotificationSurface`]; [`memory`] has in-process versions of all three.

pub mod cache;
pub mod host;
pub mod manifest;
pub mod memory;
pub mod messages;
pub mod net;
pub mod notify;
pub mod router;
pub mod updates;
pub mod version;
pub mod worker;

pub use cache::{
    Cache, CacheEntry, CacheGenerations, CacheQueryOptions, CacheStorage, PopulateReport,
    SharedCacheStorage,
};
pub use host::{
    Client, ClientHost, ClientMatchOptions, ClientType, Notification, NotificationAction,
    NotificationOptions, NotificationSurface,
};
pub use manifest::{Manifest, ManifestFetcher};
pub use messages::{InboundMessage, MandatoryNotice, OutboundMessage, UpdateInfo};
pub use net::{Destination, HttpNetwork, Network, Request, Response, ResponseType};
pub use notify::{deep_link, ClickOutcome, NotificationDispatcher, PushOutcome, PushPayload};
pub use router::{
    HostPattern, PassthroughReason, RequestRouter, RouteClass, RouteOutcome, RouterConfig, Strategy,
};
pub use updates::{UpdateBroadcaster, UpdateScheduler};
pub use version::{compare_versions, generation_name, VersionSnapshot, VersionStore};
pub use worker::{
    EventResult, ServiceWorker, ServiceWorkerState, WorkerEvent, WorkerHost, PERIODIC_UPDATE_CHECK,
    SYNC_NOTIFICATIONS,
};
