//! Worker configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::{ColombeError, Result};

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Origin the worker is registered for
    pub origin: Url,

    /// Version used until a manifest has been read
    pub default_version: String,

    /// Cache generation prefix; generations are named `<prefix>-v<version>`
    pub cache_prefix: String,

    /// Path of the release manifest, relative to the origin
    pub manifest_path: String,

    /// Assets cached at install time, relative to the origin or absolute
    pub static_assets: Vec<String>,

    /// Page served to navigations when neither network nor cache has them
    pub offline_shell: String,

    /// Image served to image requests that cannot be satisfied
    pub fallback_image: String,

    /// Push/messaging hosts that are never intercepted
    pub push_hosts: Vec<String>,

    /// Per-request network timeout in milliseconds
    pub fetch_timeout_ms: u64,

    /// Update check settings
    pub update: UpdateConfig,

    /// Notification settings
    pub notifications: NotificationConfig,

    /// Cache storage settings
    pub cache: CacheConfig,

    /// Embedded store settings
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Delay before the first check after activation
    pub initial_delay_ms: u64,

    /// Interval between checks
    pub interval_ms: u64,

    /// Delay between UPDATE_AVAILABLE and MANDATORY_UPDATE
    pub mandatory_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Title used when the payload has none
    pub default_title: String,

    /// Body used when the payload has none
    pub default_body: String,

    /// Notification icon
    pub icon: String,

    /// Monochrome badge icon
    pub badge_icon: String,

    /// Time given to a freshly opened window before messaging it
    pub open_window_settle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether the host exposes cache storage at all
    pub enabled: bool,

    /// Upper bound on cached body bytes across all generations
    pub quota_bytes: Option<u64>,
}

/// Embedded store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
    /// SQLite object store
    Sqlite,
    /// Plain key-value file
    Kv,
    /// Process memory only
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Primary backend
    pub backend: StoreBackendKind,

    /// Primary store location
    pub path: PathBuf,

    /// Key-value file used when the primary backend is unavailable
    pub fallback_path: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse("http://localhost:8080/").expect("static origin"),
            default_version: "2.2.0".to_string(),
            cache_prefix: "colombe-cache".to_string(),
            manifest_path: "/version-manifest.json".to_string(),
            static_assets: [
                "/",
                "/index.html",
                "/parent.html",
                "/manifest.json",
                "/version-manifest.json",
                "/icon-72x72.png",
                "/icon-192x192.png",
                "/icon-512x512.png",
                "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.4.0/css/all.min.css",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            offline_shell: "/parent.html".to_string(),
            fallback_image: "/icon-192x192.png".to_string(),
            push_hosts: vec!["firebase".to_string(), "googleapis".to_string()],
            fetch_timeout_ms: 15_000,
            update: UpdateConfig::default(),
            notifications: NotificationConfig::default(),
            cache: CacheConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 10_000,
            interval_ms: 5 * 60 * 1000,
            mandatory_grace_ms: 2_000,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            default_title: "CS La Colombe".to_string(),
            default_body: "New notification".to_string(),
            icon: "/icon-192x192.png".to_string(),
            badge_icon: "/icon-72x72.png".to_string(),
            open_window_settle_ms: 1_000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            quota_bytes: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("colombe");
        Self {
            backend: StoreBackendKind::Sqlite,
            path: data_dir.join("NotificationDB.sqlite"),
            fallback_path: data_dir.join("badge.json"),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| ColombeError::config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(ColombeError::config(format!(
                "origin must be http(s), got {}",
                self.origin
            )));
        }
        if self.update.interval_ms == 0 {
            return Err(ColombeError::config("update.interval_ms must be non-zero"));
        }
        if self.cache_prefix.is_empty() {
            return Err(ColombeError::config("cache_prefix must not be empty"));
        }
        Ok(())
    }

    /// Resolve a configured path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        Ok(self.origin.join(path)?)
    }

    /// Absolute manifest URL.
    pub fn manifest_url(&self) -> Result<Url> {
        self.resolve(&self.manifest_path)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl UpdateConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn mandatory_grace(&self) -> Duration {
        Duration::from_millis(self.mandatory_grace_ms)
    }
}

impl NotificationConfig {
    pub fn open_window_settle(&self) -> Duration {
        Duration::from_millis(self.open_window_settle_ms)
    }
}
