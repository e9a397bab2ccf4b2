//! Requests, responses and the network the worker fetches through.

use async_trait::async_trait;
use bytes::Bytes;
use colombe_common::{ColombeError, Result};
use http::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

/// What the requester intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    /// Top-level navigation.
    Document,
    Image,
    Script,
    Style,
    Font,
    Manifest,
    /// `fetch()` / XHR.
    #[default]
    Empty,
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub destination: Destination,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            destination: Destination::Empty,
        }
    }

    /// Create a navigation request, the way a browser issues one.
    pub fn navigate(url: Url) -> Self {
        Self::get(url)
            .destination(Destination::Document)
            .header(ACCEPT, HeaderValue::from_static("text/html,application/xhtml+xml"))
    }

    /// Set the method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set the destination.
    pub fn destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Whether the `Accept` header asks for HTML.
    pub fn accepts_html(&self) -> bool {
        self.headers
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("text/html"))
    }

    /// Whether this is a document (navigation) request.
    pub fn is_document(&self) -> bool {
        self.destination == Destination::Document || self.accepts_html()
    }

    /// Whether the request targets `origin`.
    pub fn is_same_origin(&self, origin: &Url) -> bool {
        self.url.origin() == origin.origin()
    }
}

/// Response tainting, as seen by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    /// Same-origin.
    Basic,
    /// Cross-origin, CORS-readable.
    Cors,
    /// Synthesized by the worker.
    Default,
}

/// A response. The body is a shared buffer, so clones are cheap and a
/// stored clone never consumes the caller's copy.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub response_type: ResponseType,
    /// Served from a cache generation rather than the network.
    pub from_cache: bool,
}

impl Response {
    /// Create a response with a body.
    pub fn new(url: Url, status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers: HeaderMap::new(),
            body: body.into(),
            response_type: ResponseType::Basic,
            from_cache: false,
        }
    }

    /// The synthesized answer for resources that are neither cached nor reachable.
    pub fn service_unavailable(url: Url, message: &str) -> Self {
        let mut response = Self::new(
            url,
            StatusCode::SERVICE_UNAVAILABLE,
            Bytes::copy_from_slice(message.as_bytes()),
        );
        response.status_text = "Service Unavailable".to_string();
        response.response_type = ResponseType::Default;
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        response
    }

    /// Set the response type.
    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Exactly 200.
    pub fn is_200(&self) -> bool {
        self.status == StatusCode::OK
    }

    /// Get the body as text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// The network the worker fetches through.
///
/// `Err` means the fetch itself failed (offline, DNS, timeout); HTTP error
/// statuses are successful fetches with a non-2xx status.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// `Network` over HTTP.
pub struct HttpNetwork {
    client: Client,
    origin: Url,
}

impl HttpNetwork {
    /// Create a network for a worker registered on `origin`.
    pub fn new(origin: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("colombe-worker/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| ColombeError::network_with_source("HTTP client setup failed", e))?;

        Ok(Self { client, origin })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        debug!(url = %request.url, method = %request.method, "Fetching from network");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ColombeError::network_with_source(format!("fetch {}", request.url), e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| ColombeError::network_with_source(format!("read body {}", request.url), e))?;

        trace!(url = %url, status = %status, body_len = body.len(), "Response received");

        let response_type = if url.origin() == self.origin.origin() {
            ResponseType::Basic
        } else {
            ResponseType::Cors
        };

        let mut response = Response::new(url, status, body).with_type(response_type);
        response.headers = headers;
        Ok(response)
    }
}

/// Header that asks every cache on the way to revalidate.
pub(crate) fn no_cache() -> (HeaderName, HeaderValue) {
    (CACHE_CONTROL, HeaderValue::from_static("no-cache"))
}
