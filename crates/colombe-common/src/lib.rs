//! # Colombe Common
//!
//! Error types, logging setup and worker configuration shared by the
//! Colombe offline worker crates.
//!
//! ## Features
//!
//! - One error taxonomy for network, cache, store, manifest and notification failures
//! - `tracing` subscriber setup (pretty, compact or JSON output)
//! - `WorkerConfig`, loaded from a JSON file with defaults for every field

use thiserror::Error;

pub mod config;
pub mod logging;

pub use config::{
    CacheConfig, NotificationConfig, StoreBackendKind, StoreConfig, UpdateConfig, WorkerConfig,
};
pub use logging::{init_logging, LogConfig, LogFormat};

/// Unified error type for the worker.
///
/// The first five variants are the degradable failures: the worker recovers
/// from them locally (cache fallback, default values, dropped writes) and never
/// lets them fail a lifecycle event.
#[derive(Error, Debug)]
pub enum ColombeError {
    /// Fetch rejected, timed out, or answered with a non-success status.
    #[error("Network unavailable: {message}")]
    NetworkUnavailable {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Cache bucket could not be opened or written.
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Embedded store could not be opened or a transaction failed.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Manifest body was not the expected JSON document.
    #[error("Manifest malformed: {0}")]
    ManifestMalformed(String),

    /// The notification surface refused to display a notification.
    #[error("Notification display failed: {0}")]
    NotificationDisplayFailed(String),

    /// Configuration errors.
    #[error("Config error: {0}")]
    Config(String),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ColombeError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkUnavailable {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::NetworkUnavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::CacheUnavailable(message.into())
    }

    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::StoreUnavailable(message.into())
    }

    /// Create a malformed manifest error.
    pub fn manifest(message: impl Into<String>) -> Self {
        Self::ManifestMalformed(message.into())
    }

    /// Create a notification display error.
    pub fn notification(message: impl Into<String>) -> Self {
        Self::NotificationDisplayFailed(message.into())
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Check if the worker recovers from this error locally.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            ColombeError::NetworkUnavailable { .. }
                | ColombeError::CacheUnavailable(_)
                | ColombeError::StoreUnavailable(_)
                | ColombeError::ManifestMalformed(_)
                | ColombeError::NotificationDisplayFailed(_)
        )
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            ColombeError::NetworkUnavailable { .. } => "network",
            ColombeError::CacheUnavailable(_) => "cache",
            ColombeError::StoreUnavailable(_) => "store",
            ColombeError::ManifestMalformed(_) => "manifest",
            ColombeError::NotificationDisplayFailed(_) => "notification",
            ColombeError::Config(_) => "config",
            ColombeError::InvalidUrl(_) => "invalid_url",
            ColombeError::InvalidArgument(_) => "invalid_argument",
            ColombeError::Io(_) => "io",
        }
    }
}

/// Result type alias for worker operations.
pub type Result<T> = std::result::Result<T, ColombeError>;
