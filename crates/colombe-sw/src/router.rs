//! Request classification and the retrieval strategy for each class.

use colombe_common::{Result, WorkerConfig};
use http::Method;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use url::Url;

use crate::cache::{CacheGenerations, CacheQueryOptions};
use crate::net::{Destination, Network, Request, Response};
use crate::version::VersionSnapshot;

// ==================== Host patterns ====================

/// Type of host pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternType {
    /// Exact host match.
    Exact,
    /// Suffix match (a domain and its subdomains).
    Suffix,
    /// Contains substring.
    Contains,
}

/// A pattern matched against request hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPattern {
    /// Pattern type.
    pub pattern_type: PatternType,
    /// Pattern string, lowercase.
    pub pattern: String,
}

impl HostPattern {
    /// Parse a configured pattern: `*.example.com` matches the domain and its
    /// subdomains, a dotted name matches exactly, a bare word matches any
    /// host containing it.
    pub fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim().to_ascii_lowercase();
        if let Some(domain) = pattern.strip_prefix("*.") {
            Self {
                pattern_type: PatternType::Suffix,
                pattern: domain.to_string(),
            }
        } else if pattern.contains('.') {
            Self {
                pattern_type: PatternType::Exact,
                pattern,
            }
        } else {
            Self {
                pattern_type: PatternType::Contains,
                pattern,
            }
        }
    }

    /// Check if a URL's host matches this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        match self.pattern_type {
            PatternType::Exact => host == self.pattern,
            PatternType::Suffix => {
                host == self.pattern
                    || host
                        .strip_suffix(&self.pattern)
                        .is_some_and(|rest| rest.ends_with('.'))
            }
            PatternType::Contains => host.contains(&self.pattern),
        }
    }
}

// ==================== Classification ====================

/// Why a request is left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassthroughReason {
    /// Not a GET.
    NonGet,
    /// Push or messaging infrastructure.
    PushHost,
}

/// Policy class of a request, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Passthrough(PassthroughReason),
    Manifest,
    Document,
    Asset,
}

/// Retrieval strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Not intercepted.
    NetworkOnly,
    NetworkFirst,
    CacheFirst,
}

impl RouteClass {
    pub fn strategy(self) -> Strategy {
        match self {
            RouteClass::Passthrough(_) => Strategy::NetworkOnly,
            RouteClass::Manifest | RouteClass::Document => Strategy::NetworkFirst,
            RouteClass::Asset => Strategy::CacheFirst,
        }
    }
}

/// The fixed inputs of classification.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub origin: Url,
    pub manifest_url: Url,
    pub offline_shell: Url,
    pub fallback_image: Url,
    pub push_hosts: Vec<HostPattern>,
}

impl RouterConfig {
    pub fn from_config(config: &WorkerConfig) -> Result<Self> {
        Ok(Self {
            origin: config.origin.clone(),
            manifest_url: config.manifest_url()?,
            offline_shell: config.resolve(&config.offline_shell)?,
            fallback_image: config.resolve(&config.fallback_image)?,
            push_hosts: config.push_hosts.iter().map(|p| HostPattern::parse(p)).collect(),
        })
    }

    fn is_manifest(&self, url: &Url) -> bool {
        url.origin() == self.manifest_url.origin() && url.path() == self.manifest_url.path()
    }

    /// Classify a request. Depends only on the request and this config.
    pub fn classify(&self, request: &Request) -> RouteClass {
        if request.method != Method::GET {
            RouteClass::Passthrough(PassthroughReason::NonGet)
        } else if self.push_hosts.iter().any(|p| p.matches(&request.url)) {
            RouteClass::Passthrough(PassthroughReason::PushHost)
        } else if self.is_manifest(&request.url) {
            RouteClass::Manifest
        } else if request.is_document() {
            RouteClass::Document
        } else {
            RouteClass::Asset
        }
    }
}

// ==================== Router ====================

/// What the worker does with an intercepted request.
#[derive(Debug)]
pub enum RouteOutcome {
    /// Let the request go to the network untouched.
    Passthrough,
    /// Answer with this response.
    Respond(Response),
}

impl RouteOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            RouteOutcome::Passthrough => None,
            RouteOutcome::Respond(response) => Some(response),
        }
    }
}

const OFFLINE_MESSAGE: &str = "Resource unavailable offline";

/// Applies the strategy of each route class.
pub struct RequestRouter {
    config: RouterConfig,
    generations: CacheGenerations,
    network: Arc<dyn Network>,
}

impl RequestRouter {
    pub fn new(config: RouterConfig, generations: CacheGenerations, network: Arc<dyn Network>) -> Self {
        Self {
            config,
            generations,
            network,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn classify(&self, request: &Request) -> RouteClass {
        self.config.classify(request)
    }

    /// Handle an intercepted request against the given generation.
    pub async fn handle(&self, snapshot: &VersionSnapshot, request: &Request) -> RouteOutcome {
        let class = self.classify(request);
        trace!(url = %request.url, class = ?class, "Routing request");

        match class {
            RouteClass::Passthrough(_) => RouteOutcome::Passthrough,
            RouteClass::Manifest => RouteOutcome::Respond(self.manifest(snapshot, request).await),
            RouteClass::Document => RouteOutcome::Respond(self.document(snapshot, request).await),
            RouteClass::Asset => RouteOutcome::Respond(self.asset(snapshot, request).await),
        }
    }

    /// Cache miss and cache failure look the same to a request.
    async fn cached(&self, snapshot: &VersionSnapshot, url: &Url, options: CacheQueryOptions) -> Option<Response> {
        match self.generations.lookup(snapshot, url, options).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(url = %url, error = %e, "Cache lookup failed");
                None
            }
        }
    }

    async fn remember(&self, snapshot: &VersionSnapshot, url: &Url, response: &Response) {
        if let Err(e) = self.generations.store(snapshot, url, response).await {
            warn!(url = %url, error = %e, "Response not cached");
        }
    }

    /// Network first, never written to the cache.
    async fn manifest(&self, snapshot: &VersionSnapshot, request: &Request) -> Response {
        match self.network.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %request.url, error = %e, "Manifest offline, trying cache");
                self.cached(snapshot, &request.url, CacheQueryOptions { ignore_search: true })
                    .await
                    .unwrap_or_else(|| Response::service_unavailable(request.url.clone(), OFFLINE_MESSAGE))
            }
        }
    }

    /// Network first, cache fallback, then the offline shell.
    async fn document(&self, snapshot: &VersionSnapshot, request: &Request) -> Response {
        match self.network.fetch(request).await {
            Ok(response) => {
                if response.is_200() && request.is_same_origin(&self.config.origin) {
                    self.remember(snapshot, &request.url, &response).await;
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Document offline, trying cache");
                if let Some(hit) = self.cached(snapshot, &request.url, CacheQueryOptions::default()).await {
                    return hit;
                }
                self.cached(snapshot, &self.config.offline_shell, CacheQueryOptions::default())
                    .await
                    .unwrap_or_else(|| Response::service_unavailable(request.url.clone(), OFFLINE_MESSAGE))
            }
        }
    }

    /// Cache first, network fallback, then the fallback image or a 503.
    async fn asset(&self, snapshot: &VersionSnapshot, request: &Request) -> Response {
        if let Some(hit) = self.cached(snapshot, &request.url, CacheQueryOptions::default()).await {
            trace!(url = %request.url, "Served from cache");
            return hit;
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                if response.is_200() && request.is_same_origin(&self.config.origin) {
                    self.remember(snapshot, &request.url, &response).await;
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Asset unavailable");
                if request.destination == Destination::Image {
                    if let Some(image) = self
                        .cached(snapshot, &self.config.fallback_image, CacheQueryOptions::default())
                        .await
                    {
                        return image;
                    }
                }
                Response::service_unavailable(request.url.clone(), OFFLINE_MESSAGE)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStorage;
    use crate::memory::ScriptedNetwork;
    use http::header::ACCEPT;
    use http::{HeaderValue, StatusCode};

    fn url(path: &str) -> Url {
        Url::parse("http://localhost:8080/").unwrap().join(path).unwrap()
    }

    fn router(network: Arc<ScriptedNetwork>) -> RequestRouter {
        let config = RouterConfig::from_config(&WorkerConfig::default()).unwrap();
        let generations = CacheGenerations::new(CacheStorage::default(), network.clone());
        RequestRouter::new(config, generations, network)
    }

    fn snapshot() -> VersionSnapshot {
        VersionSnapshot::new("colombe-cache", "2.2.0")
    }

    #[test]
    fn test_host_patterns() {
        let word = HostPattern::parse("firebase");
        assert_eq!(word.pattern_type, PatternType::Contains);
        assert!(word.matches(&Url::parse("https://firebaseinstallations.googleapis.com/v1").unwrap()));

        let suffix = HostPattern::parse("*.gstatic.com");
        assert!(suffix.matches(&Url::parse("https://www.gstatic.com/x.js").unwrap()));
        assert!(suffix.matches(&Url::parse("https://gstatic.com/x.js").unwrap()));
        assert!(!suffix.matches(&Url::parse("https://notgstatic.com/x.js").unwrap()));

        let exact = HostPattern::parse("fcm.googleapis.com");
        assert!(exact.matches(&Url::parse("https://FCM.googleapis.com/fcm/send").unwrap()));
        assert!(!exact.matches(&Url::parse("https://www.googleapis.com/").unwrap()));
    }

    #[test]
    fn test_classification_priority() {
        let config = RouterConfig::from_config(&WorkerConfig::default()).unwrap();

        let post = Request::get(url("/version-manifest.json")).method(Method::POST);
        assert_eq!(config.classify(&post), RouteClass::Passthrough(PassthroughReason::NonGet));

        let push = Request::navigate(Url::parse("https://fcmregistrations.googleapis.com/").unwrap());
        assert_eq!(config.classify(&push), RouteClass::Passthrough(PassthroughReason::PushHost));

        let manifest = Request::navigate(url("/version-manifest.json?t=123"));
        assert_eq!(config.classify(&manifest), RouteClass::Manifest);

        let by_accept = Request::get(url("/parent.html"))
            .header(ACCEPT, HeaderValue::from_static("text/html"));
        assert_eq!(config.classify(&by_accept), RouteClass::Document);

        let asset = Request::get(url("/icon-72x72.png")).destination(Destination::Image);
        assert_eq!(config.classify(&asset), RouteClass::Asset);
        assert_eq!(RouteClass::Asset.strategy(), Strategy::CacheFirst);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let config = RouterConfig::from_config(&WorkerConfig::default()).unwrap();
        let request = Request::navigate(url("/index.html"));
        let first = config.classify(&request);
        for _ in 0..10 {
            assert_eq!(config.classify(&request), first);
        }
    }

    #[tokio::test]
    async fn test_passthrough_never_fetches() {
        let network = Arc::new(ScriptedNetwork::new());
        let router = router(network.clone());

        let outcome = router
            .handle(&snapshot(), &Request::get(url("/api")).method(Method::POST))
            .await;
        assert!(matches!(outcome, RouteOutcome::Passthrough));
        assert!(network.requests().is_empty());
    }

    #[tokio::test]
    async fn test_document_network_first_then_cache() {
        let network = Arc::new(ScriptedNetwork::new());
        network.respond(url("/parent.html").as_str(), StatusCode::OK, "fresh");
        let router = router(network.clone());
        let request = Request::navigate(url("/parent.html"));

        let online = router.handle(&snapshot(), &request).await;
        assert_eq!(online.response().unwrap().text(), "fresh");
        assert!(!online.response().unwrap().from_cache);

        network.set_offline(true);
        let offline = router.handle(&snapshot(), &request).await;
        let response = offline.response().unwrap();
        assert!(response.from_cache);
        assert_eq!(response.text(), "fresh");
    }

    #[tokio::test]
    async fn test_document_offline_shell() {
        let network = Arc::new(ScriptedNetwork::new());
        network.respond(url("/parent.html").as_str(), StatusCode::OK, "shell");
        let router = router(network.clone());
        router.handle(&snapshot(), &Request::navigate(url("/parent.html"))).await;

        network.set_offline(true);
        let outcome = router.handle(&snapshot(), &Request::navigate(url("/grades.html"))).await;
        assert_eq!(outcome.response().unwrap().text(), "shell");
    }

    #[tokio::test]
    async fn test_document_partial_response_not_cached() {
        let network = Arc::new(ScriptedNetwork::new());
        network.respond(url("/parent.html").as_str(), StatusCode::OK, "shell");
        network.respond(url("/report.html").as_str(), StatusCode::PARTIAL_CONTENT, "partial");
        network.respond(url("/empty.html").as_str(), StatusCode::NO_CONTENT, "");
        let router = router(network.clone());
        router.handle(&snapshot(), &Request::navigate(url("/parent.html"))).await;

        let online = router.handle(&snapshot(), &Request::navigate(url("/report.html"))).await;
        assert_eq!(online.response().unwrap().status, StatusCode::PARTIAL_CONTENT);
        router.handle(&snapshot(), &Request::navigate(url("/empty.html"))).await;

        network.set_offline(true);
        for path in ["/report.html", "/empty.html"] {
            let outcome = router.handle(&snapshot(), &Request::navigate(url(path))).await;
            let response = outcome.response().unwrap();
            assert_eq!(response.status, StatusCode::OK, "{path}");
            assert_eq!(response.text(), "shell", "{path}");
        }
    }

    #[tokio::test]
    async fn test_document_cross_origin_not_cached() {
        let network = Arc::new(ScriptedNetwork::new());
        network.respond("https://portal.example.net/news.html", StatusCode::OK, "news");
        let router = router(network.clone());
        let request = Request::navigate(Url::parse("https://portal.example.net/news.html").unwrap());
        router.handle(&snapshot(), &request).await;

        network.set_offline(true);
        let outcome = router.handle(&snapshot(), &request).await;
        assert_eq!(outcome.response().unwrap().status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_manifest_not_written_to_cache() {
        let network = Arc::new(ScriptedNetwork::new());
        network.respond(url("/version-manifest.json").as_str(), StatusCode::OK, "{}");
        let router = router(network.clone());

        router
            .handle(&snapshot(), &Request::get(url("/version-manifest.json?t=1")))
            .await;

        network.set_offline(true);
        let outcome = router
            .handle(&snapshot(), &Request::get(url("/version-manifest.json?t=2")))
            .await;
        assert_eq!(outcome.response().unwrap().status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_asset_caches_same_origin_200_only() {
        let network = Arc::new(ScriptedNetwork::new());
        network.respond(url("/app.js").as_str(), StatusCode::OK, "js");
        network.respond(url("/gone.js").as_str(), StatusCode::NOT_FOUND, "");
        network.respond("https://cdn.example.net/lib.js", StatusCode::OK, "lib");
        let router = router(network.clone());

        for target in [url("/app.js"), url("/gone.js"), Url::parse("https://cdn.example.net/lib.js").unwrap()] {
            router.handle(&snapshot(), &Request::get(target)).await;
        }

        network.set_offline(true);
        let ok = router.handle(&snapshot(), &Request::get(url("/app.js"))).await;
        assert!(ok.response().unwrap().from_cache);

        let gone = router.handle(&snapshot(), &Request::get(url("/gone.js"))).await;
        assert_eq!(gone.response().unwrap().status, StatusCode::SERVICE_UNAVAILABLE);

        let cdn = router
            .handle(&snapshot(), &Request::get(Url::parse("https://cdn.example.net/lib.js").unwrap()))
            .await;
        assert_eq!(cdn.response().unwrap().status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_image_fallback() {
        let network = Arc::new(ScriptedNetwork::new());
        network.respond(url("/icon-192x192.png").as_str(), StatusCode::OK, "png");
        let router = router(network.clone());
        router
            .handle(&snapshot(), &Request::get(url("/icon-192x192.png")))
            .await;

        network.set_offline(true);
        let image = Request::get(url("/photos/42.jpg")).destination(Destination::Image);
        let outcome = router.handle(&snapshot(), &image).await;
        assert_eq!(outcome.response().unwrap().text(), "png");

        let script = Request::get(url("/photos/42.js")).destination(Destination::Script);
        let outcome = router.handle(&snapshot(), &script).await;
        let response = outcome.response().unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.status_text, "Service Unavailable");
    }
}
