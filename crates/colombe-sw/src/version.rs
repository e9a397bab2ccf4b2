//! Application version and the cache generation derived from it.

use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::manifest::ManifestFetcher;

/// Compare dotted numeric versions component by component.
///
/// Missing trailing components count as 0, so `"2.2" == "2.2.0"`. A
/// component that is not a number also counts as 0.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.trim()
            .split('.')
            .map(|part| part.trim().parse().unwrap_or(0))
            .collect()
    };
    let (a, b) = (parse(a), parse(b));

    (0..a.len().max(b.len()))
        .map(|i| {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            x.cmp(&y)
        })
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Name of the cache generation for `version`.
pub fn generation_name(prefix: &str, version: &str) -> String {
    format!("{prefix}-v{version}")
}

/// The active version and its cache generation. Immutable; a new snapshot
/// is derived at each install and activate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSnapshot {
    pub version: String,
    pub cache_name: String,
}

impl VersionSnapshot {
    pub fn new(prefix: &str, version: impl Into<String>) -> Self {
        let version = version.into();
        Self {
            cache_name: generation_name(prefix, &version),
            version,
        }
    }
}

/// Holds the current snapshot and re-derives it from the manifest.
pub struct VersionStore {
    prefix: String,
    fetcher: Arc<ManifestFetcher>,
    current: RwLock<Arc<VersionSnapshot>>,
}

impl VersionStore {
    /// Create a store starting at `default_version`.
    pub fn new(prefix: impl Into<String>, default_version: &str, fetcher: Arc<ManifestFetcher>) -> Self {
        let prefix = prefix.into();
        let current = Arc::new(VersionSnapshot::new(&prefix, default_version));
        Self {
            prefix,
            fetcher,
            current: RwLock::new(current),
        }
    }

    /// Current snapshot.
    pub async fn snapshot(&self) -> Arc<VersionSnapshot> {
        self.current.read().await.clone()
    }

    /// Adopt the manifest's version, or keep the last known one when the
    /// manifest cannot be read. Always yields a usable generation name and
    /// may be called any number of times.
    pub async fn initialize(&self) -> Arc<VersionSnapshot> {
        match self.fetcher.fetch().await {
            Ok(manifest) => {
                let snapshot = Arc::new(VersionSnapshot::new(&self.prefix, manifest.current_version));
                info!(
                    version = %snapshot.version,
                    cache = %snapshot.cache_name,
                    "Version loaded from manifest"
                );
                *self.current.write().await = snapshot.clone();
                snapshot
            }
            Err(e) => {
                let snapshot = self.snapshot().await;
                warn!(
                    error = %e,
                    category = e.category(),
                    version = %snapshot.version,
                    "Manifest unavailable, keeping current version"
                );
                snapshot
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ScriptedNetwork;
    use http::StatusCode;
    use url::Url;

    const MANIFEST: &str = "https://portal.example.org/version-manifest.json";

    fn store(network: Arc<ScriptedNetwork>) -> VersionStore {
        let fetcher = ManifestFetcher::new(network, Url::parse(MANIFEST).unwrap());
        VersionStore::new("colombe-cache", "2.2.0", Arc::new(fetcher))
    }

    #[test]
    fn test_numeric_not_lexicographic() {
        assert_eq!(compare_versions("2.2.0", "2.10.0"), Ordering::Less);
        assert_eq!(compare_versions("10.0.0", "9.9.9"), Ordering::Greater);
    }

    #[test]
    fn test_missing_components_are_zero() {
        assert_eq!(compare_versions("2.2", "2.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("3", "3.0.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("2.2", "2.2.1"), Ordering::Less);
    }

    #[test]
    fn test_antisymmetric() {
        let versions = ["0", "1.0", "1.0.1", "2.2.0", "2.10.0", "2.3", "10.1.0", "x.1"];
        for a in versions {
            assert_eq!(compare_versions(a, a), Ordering::Equal);
            for b in versions {
                assert_eq!(compare_versions(a, b), compare_versions(b, a).reverse());
            }
        }
    }

    #[test]
    fn test_generation_name() {
        let snapshot = VersionSnapshot::new("colombe-cache", "2.2.0");
        assert_eq!(snapshot.cache_name, "colombe-cache-v2.2.0");
    }

    #[tokio::test]
    async fn test_initialize_adopts_manifest() {
        let network = Arc::new(ScriptedNetwork::new());
        network.respond(MANIFEST, StatusCode::OK, r#"{"currentVersion":"2.3.0"}"#);
        let versions = store(network);

        let snapshot = versions.initialize().await;
        assert_eq!(snapshot.version, "2.3.0");
        assert_eq!(snapshot.cache_name, "colombe-cache-v2.3.0");
        assert_eq!(*versions.snapshot().await, *snapshot);
    }

    #[tokio::test]
    async fn test_initialize_offline_keeps_default() {
        let network = Arc::new(ScriptedNetwork::new());
        network.set_offline(true);
        let versions = store(network);

        let snapshot = versions.initialize().await;
        assert_eq!(snapshot.version, "2.2.0");
        assert_eq!(snapshot.cache_name, "colombe-cache-v2.2.0");
    }

    #[tokio::test]
    async fn test_initialize_is_repeatable() {
        let network = Arc::new(ScriptedNetwork::new());
        network.respond(MANIFEST, StatusCode::OK, r#"{"currentVersion":"2.3.0"}"#);
        let versions = store(network.clone());

        let first = versions.initialize().await;
        let second = versions.initialize().await;
        assert_eq!(first, second);

        // A later failure keeps the last version read
        network.set_offline(true);
        assert_eq!(versions.initialize().await.version, "2.3.0");
    }
}
