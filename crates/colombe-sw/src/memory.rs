//! In-process hosts: a scripted network, a client registry and a
//! notification surface that record every call.
//!
//! Used by the tests and by hosts that have no real windows.

use async_trait::async_trait;
use bytes::Bytes;
use colombe_common::{ColombeError, Result};
use hashbrown::HashMap;
use http::StatusCode;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;
use url::Url;

use crate::host::{
    Client, ClientHost, ClientMatchOptions, ClientType, Notification, NotificationSurface,
};
use crate::messages::OutboundMessage;
use crate::net::{Network, Request, Response};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn without_query(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.to_string()
}

// ==================== Network ====================

/// A network answering from a fixed table keyed by URL (query ignored).
/// Unscripted URLs fail like an unreachable host.
#[derive(Default)]
pub struct ScriptedNetwork {
    routes: Mutex<HashMap<String, (StatusCode, Bytes)>>,
    requests: Mutex<Vec<Request>>,
    offline: AtomicBool,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with `status` and `body`.
    pub fn respond(&self, url: &str, status: StatusCode, body: impl Into<Bytes>) {
        let key = Url::parse(url)
            .map(|u| without_query(&u))
            .unwrap_or_else(|_| url.to_string());
        lock(&self.routes).insert(key, (status, body.into()));
    }

    /// Make every fetch fail.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Every request seen so far.
    pub fn requests(&self) -> Vec<Request> {
        lock(&self.requests).clone()
    }

    /// Number of requests for `url` (query ignored).
    pub fn hits(&self, url: &str) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|r| without_query(&r.url) == url)
            .count()
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        lock(&self.requests).push(request.clone());

        if self.offline.load(Ordering::SeqCst) {
            return Err(ColombeError::network(format!("offline: {}", request.url)));
        }

        let route = lock(&self.routes).get(&without_query(&request.url)).cloned();
        match route {
            Some((status, body)) => Ok(Response::new(request.url.clone(), status, body)),
            None => Err(ColombeError::network(format!("unreachable: {}", request.url))),
        }
    }
}

// ==================== Clients ====================

/// Lifecycle calls seen by [`MemoryClients`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LifecycleCalls {
    pub claimed: usize,
    pub skipped_waiting: usize,
}

/// A client registry that records what the worker did to it.
#[derive(Default)]
pub struct MemoryClients {
    clients: Mutex<Vec<Client>>,
    messages: Mutex<Vec<(String, OutboundMessage)>>,
    focused: Mutex<Vec<String>>,
    opened: Mutex<Vec<Url>>,
    lifecycle: Mutex<LifecycleCalls>,
    next_id: AtomicUsize,
}

impl MemoryClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an open window at `url`. Returns its id.
    pub fn add_window(&self, url: Url, focused: bool, controlled: bool) -> String {
        let id = format!("client-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        lock(&self.clients).push(Client {
            id: id.clone(),
            url,
            client_type: ClientType::Window,
            focused,
            controlled,
        });
        id
    }

    /// Messages posted so far, as `(client id, message)`.
    pub fn messages(&self) -> Vec<(String, OutboundMessage)> {
        lock(&self.messages).clone()
    }

    /// Messages of one type, in order.
    pub fn messages_of(&self, kind: &str) -> Vec<(String, OutboundMessage)> {
        self.messages()
            .into_iter()
            .filter(|(_, m)| m.kind() == kind)
            .collect()
    }

    pub fn focused(&self) -> Vec<String> {
        lock(&self.focused).clone()
    }

    pub fn opened(&self) -> Vec<Url> {
        lock(&self.opened).clone()
    }

    pub fn lifecycle(&self) -> LifecycleCalls {
        lock(&self.lifecycle).clone()
    }
}

#[async_trait]
impl ClientHost for MemoryClients {
    async fn match_all(&self, options: &ClientMatchOptions) -> Vec<Client> {
        lock(&self.clients)
            .iter()
            .filter(|c| options.matches(c))
            .cloned()
            .collect()
    }

    async fn post_message(&self, client_id: &str, message: &OutboundMessage) -> Result<()> {
        debug!(client_id, kind = message.kind(), "Message posted");
        lock(&self.messages).push((client_id.to_string(), message.clone()));
        Ok(())
    }

    async fn focus(&self, client_id: &str) -> Result<Client> {
        let mut clients = lock(&self.clients);
        let mut found = None;
        for client in clients.iter_mut() {
            client.focused = client.id == client_id;
            if client.focused {
                found = Some(client.clone());
            }
        }
        let client = found.ok_or_else(|| {
            ColombeError::InvalidArgument(format!("no client {client_id}"))
        })?;
        lock(&self.focused).push(client_id.to_string());
        Ok(client)
    }

    async fn open_window(&self, url: &Url) -> Result<Option<Client>> {
        lock(&self.opened).push(url.clone());
        let id = self.add_window(url.clone(), true, true);
        let client = lock(&self.clients).iter().find(|c| c.id == id).cloned();
        Ok(client)
    }

    async fn claim(&self) -> Result<()> {
        lock(&self.lifecycle).claimed += 1;
        for client in lock(&self.clients).iter_mut() {
            client.controlled = true;
        }
        Ok(())
    }

    async fn skip_waiting(&self) -> Result<()> {
        lock(&self.lifecycle).skipped_waiting += 1;
        Ok(())
    }
}

// ==================== Notifications ====================

/// A notification surface that records shown and closed notifications.
#[derive(Default)]
pub struct MemorySurface {
    shown: Mutex<Vec<Notification>>,
    closed: Mutex<Vec<Notification>>,
    app_badge: Mutex<Option<u64>>,
    refuse: AtomicBool,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse to show notifications, like a revoked permission.
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn shown(&self) -> Vec<Notification> {
        lock(&self.shown).clone()
    }

    pub fn closed(&self) -> Vec<Notification> {
        lock(&self.closed).clone()
    }

    /// The OS badge, `None` when cleared or never set.
    pub fn app_badge(&self) -> Option<u64> {
        *lock(&self.app_badge)
    }
}

#[async_trait]
impl NotificationSurface for MemorySurface {
    async fn show(&self, notification: &Notification) -> Result<()> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ColombeError::notification("permission denied"));
        }
        let mut shown = lock(&self.shown);
        shown.retain(|n| n.tag() != notification.tag());
        shown.push(notification.clone());
        Ok(())
    }

    async fn close(&self, notification: &Notification) {
        lock(&self.shown).retain(|n| n.tag() != notification.tag());
        lock(&self.closed).push(notification.clone());
    }

    async fn set_app_badge(&self, count: u64) -> Result<()> {
        *lock(&self.app_badge) = Some(count);
        Ok(())
    }

    async fn clear_app_badge(&self) -> Result<()> {
        *lock(&self.app_badge) = None;
        Ok(())
    }
}
