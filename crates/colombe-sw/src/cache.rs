//! Cache storage and the versioned cache generations built on it.

use bytes::Bytes;
use colombe_common::{CacheConfig, ColombeError, Result};
use futures::future::join_all;
use hashbrown::HashMap;
use http::{HeaderMap, StatusCode};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::net::{Network, Request, Response};
use crate::version::VersionSnapshot;

// ==================== Cache ====================

/// A cached response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Request URL.
    pub url: Url,

    /// Response status.
    pub status: StatusCode,

    /// Response headers.
    pub headers: HeaderMap,

    /// Response body.
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: i64,
}

impl CacheEntry {
    /// Capture a response. The body buffer is shared, not copied.
    pub fn from_response(url: Url, response: &Response) -> Self {
        Self {
            url,
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            cached_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Rebuild the response.
    pub fn to_response(&self) -> Response {
        let mut response = Response::new(self.url.clone(), self.status, self.body.clone());
        response.headers = self.headers.clone();
        response.from_cache = true;
        response
    }
}

/// Options for matching a request against a cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheQueryOptions {
    /// Ignore the query string when matching.
    pub ignore_search: bool,
}

fn strip_search(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_query(None);
    url
}

fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

/// A named cache bucket.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request URL.
    pub fn match_request(&self, url: &Url, options: CacheQueryOptions) -> Option<&CacheEntry> {
        if let Some(entry) = self.entries.get(&cache_key(url)) {
            return Some(entry);
        }
        if options.ignore_search {
            let wanted = strip_search(url);
            return self
                .entries
                .values()
                .find(|e| strip_search(&e.url) == wanted);
        }
        None
    }

    /// Add entry.
    pub fn put(&mut self, entry: CacheEntry) {
        self.entries.insert(cache_key(&entry.url), entry);
    }

    /// Delete entry.
    pub fn delete(&mut self, url: &Url) -> bool {
        self.entries.remove(&cache_key(url)).is_some()
    }

    /// Get all keys (URLs).
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Bytes held by bodies in this cache.
    pub fn size_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.body.len() as u64).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// Every cache bucket of the origin.
#[derive(Debug)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
    enabled: bool,
    quota_bytes: Option<u64>,
}

/// Cache storage shared by every worker instance on a host.
pub type SharedCacheStorage = Arc<RwLock<CacheStorage>>;

impl Default for CacheStorage {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl CacheStorage {
    /// Storage ready to hand to several workers.
    pub fn shared(config: &CacheConfig) -> SharedCacheStorage {
        Arc::new(RwLock::new(Self::new(config)))
    }

    /// Create new cache storage.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            caches: HashMap::new(),
            enabled: config.enabled,
            quota_bytes: config.quota_bytes,
        }
    }

    fn check_enabled(&self) -> Result<()> {
        if self.enabled {
            Ok(())
        } else {
            Err(ColombeError::cache("cache storage is disabled"))
        }
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> Result<&mut Cache> {
        self.check_enabled()?;
        Ok(self
            .caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name)))
    }

    /// Look up a cache without creating it.
    pub fn get(&self, name: &str) -> Result<Option<&Cache>> {
        self.check_enabled()?;
        Ok(self.caches.get(name))
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> Result<bool> {
        self.check_enabled()?;
        Ok(self.caches.remove(name).is_some())
    }

    /// Get all cache names.
    pub fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.keys().cloned().collect();
        names.sort();
        names
    }

    /// Bytes held across every cache.
    pub fn total_bytes(&self) -> u64 {
        self.caches.values().map(Cache::size_bytes).sum()
    }

    /// Store an entry in `name`, enforcing the quota.
    pub fn put(&mut self, name: &str, entry: CacheEntry) -> Result<()> {
        if let Some(quota) = self.quota_bytes {
            let replaced = self
                .caches
                .get(name)
                .and_then(|c| c.match_request(&entry.url, CacheQueryOptions::default()))
                .map(|e| e.body.len() as u64)
                .unwrap_or(0);
            let needed = self.total_bytes() - replaced + entry.body.len() as u64;
            if needed > quota {
                return Err(ColombeError::cache(format!(
                    "quota exceeded storing {} ({needed} > {quota} bytes)",
                    entry.url
                )));
            }
        }
        self.open(name)?.put(entry);
        Ok(())
    }
}

// ==================== Generations ====================

/// Outcome of populating a generation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PopulateReport {
    pub cached: usize,
    pub failed: Vec<String>,
}

/// The versioned buckets: one current generation, older ones swept at
/// activation.
#[derive(Clone)]
pub struct CacheGenerations {
    storage: Arc<RwLock<CacheStorage>>,
    network: Arc<dyn Network>,
}

impl CacheGenerations {
    pub fn new(storage: CacheStorage, network: Arc<dyn Network>) -> Self {
        Self::shared(Arc::new(RwLock::new(storage)), network)
    }

    /// Generations over storage that other workers also see.
    pub fn shared(storage: SharedCacheStorage, network: Arc<dyn Network>) -> Self {
        Self { storage, network }
    }

    /// Fetch every URL and add the successful responses to the current
    /// generation. A failing URL is reported, never fatal; only an
    /// unavailable cache is an error.
    pub async fn populate(&self, snapshot: &VersionSnapshot, urls: &[Url]) -> Result<PopulateReport> {
        self.storage.write().await.open(&snapshot.cache_name)?;

        let fetches = urls.iter().map(|url| async move {
            let request = Request::get(url.clone());
            let result = match self.network.fetch(&request).await {
                Ok(response) if response.ok() => Ok(response),
                Ok(response) => Err(ColombeError::network(format!("status {}", response.status))),
                Err(e) => Err(e),
            };
            (url, result)
        });

        let mut report = PopulateReport::default();
        for (url, result) in join_all(fetches).await {
            let stored = match result {
                Ok(response) => self.storage.write().await.put(
                    &snapshot.cache_name,
                    CacheEntry::from_response(url.clone(), &response),
                ),
                Err(e) => Err(e),
            };
            match stored {
                Ok(()) => report.cached += 1,
                Err(e) => {
                    warn!(url = %url, error = %e, "Asset not cached");
                    report.failed.push(url.to_string());
                }
            }
        }

        info!(
            cache = %snapshot.cache_name,
            cached = report.cached,
            failed = report.failed.len(),
            "Cache generation populated"
        );
        Ok(report)
    }

    /// Delete every bucket except the current generation, which is created
    /// if missing. Returns the deleted names.
    pub async fn sweep(&self, snapshot: &VersionSnapshot) -> Result<Vec<String>> {
        let mut storage = self.storage.write().await;
        storage.open(&snapshot.cache_name)?;

        let mut deleted = Vec::new();
        for name in storage.keys() {
            if name != snapshot.cache_name && storage.delete(&name)? {
                info!(cache = %name, "Old cache generation deleted");
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    /// Match against the current generation only.
    pub async fn lookup(
        &self,
        snapshot: &VersionSnapshot,
        url: &Url,
        options: CacheQueryOptions,
    ) -> Result<Option<Response>> {
        let storage = self.storage.read().await;
        let hit = storage
            .get(&snapshot.cache_name)?
            .and_then(|cache| cache.match_request(url, options))
            .map(CacheEntry::to_response);
        debug!(url = %url, hit = hit.is_some(), "Cache lookup");
        Ok(hit)
    }

    /// Store a copy of `response` under the current generation. The caller
    /// keeps its own response.
    pub async fn store(&self, snapshot: &VersionSnapshot, url: &Url, response: &Response) -> Result<()> {
        self.storage
            .write()
            .await
            .put(&snapshot.cache_name, CacheEntry::from_response(url.clone(), response))
    }

    /// Delete one bucket.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        self.storage.write().await.delete(name)
    }

    /// Names of every bucket.
    pub async fn names(&self) -> Vec<String> {
        self.storage.read().await.keys()
    }
}
