//! End-to-end behavior of a worker against in-process hosts.

use bytes::Bytes;
use colombe_common::WorkerConfig;
use colombe_store::RecordStore;
use colombe_sw::memory::{MemoryClients, MemorySurface, ScriptedNetwork};
use colombe_sw::{
    CacheStorage, ClickOutcome, Destination, EventResult, OutboundMessage, PushOutcome, Request,
    RouteOutcome, ServiceWorker, ServiceWorkerState, WorkerEvent, WorkerHost,
};
use http::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const ORIGIN: &str = "http://localhost:8080/";
const MANIFEST: &str = "http://localhost:8080/version-manifest.json";
const ICON: &str = "http://localhost:8080/icon-192x192.png";
const ICON_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n-colombe-icon";

struct Harness {
    network: Arc<ScriptedNetwork>,
    clients: Arc<MemoryClients>,
    surface: Arc<MemorySurface>,
    host: WorkerHost,
    worker: ServiceWorker,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("colombe_sw=debug")
        .with_test_writer()
        .try_init();
}

fn host(network: Arc<ScriptedNetwork>, clients: Arc<MemoryClients>, surface: Arc<MemorySurface>) -> WorkerHost {
    WorkerHost {
        network,
        clients,
        surface,
        records: Arc::new(RecordStore::in_memory()),
        caches: CacheStorage::shared(&WorkerConfig::default().cache),
    }
}

fn manifest(version: &str, mandatory: bool) -> String {
    format!(
        r#"{{"currentVersion":"{version}","changelog":"Bulletins du trimestre","mandatory":{mandatory},"releaseDate":"2024-09-01"}}"#
    )
}

/// A worker installed and activated at version 2.2.0, with one open window.
async fn activated_worker() -> Harness {
    init_tracing();

    let network = Arc::new(ScriptedNetwork::new());
    network.respond(MANIFEST, StatusCode::OK, manifest("2.2.0", false));
    network.respond(ORIGIN, StatusCode::OK, "<html>home</html>");
    network.respond(ICON, StatusCode::OK, Bytes::from_static(ICON_BYTES));

    let clients = Arc::new(MemoryClients::new());
    clients.add_window(Url::parse("http://localhost:8080/parent.html").unwrap(), false, true);
    let surface = Arc::new(MemorySurface::new());

    let host = host(network.clone(), clients.clone(), surface.clone());
    let worker = ServiceWorker::new(WorkerConfig::default(), host.clone()).unwrap();

    worker.dispatch(WorkerEvent::Install).await;
    worker.dispatch(WorkerEvent::Activate).await;
    assert_eq!(worker.snapshot().await.version, "2.2.0");

    Harness {
        network,
        clients,
        surface,
        host,
        worker,
    }
}

#[tokio::test(start_paused = true)]
async fn optional_update_is_announced_once() {
    let h = activated_worker().await;
    let lifecycle = h.clients.lifecycle();
    h.network.respond(MANIFEST, StatusCode::OK, manifest("2.3.0", false));

    // First scheduled check runs 10 s after activation
    tokio::time::sleep(Duration::from_secs(11)).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let updates = h.clients.messages_of("UPDATE_AVAILABLE");
    assert_eq!(updates.len(), 1);
    match &updates[0].1 {
        OutboundMessage::UpdateAvailable { data } => {
            assert_eq!(data.current_version, "2.2.0");
            assert_eq!(data.new_version, "2.3.0");
            assert!(!data.mandatory);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(h.clients.messages_of("MANDATORY_UPDATE").is_empty());
    assert_eq!(h.clients.lifecycle(), lifecycle);
}

#[tokio::test(start_paused = true)]
async fn mandatory_update_escalates_and_takes_over() {
    let h = activated_worker().await;
    let before = h.clients.lifecycle();
    h.network.respond(MANIFEST, StatusCode::OK, manifest("2.3.0", true));

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(h.clients.messages_of("UPDATE_AVAILABLE").len(), 1);
    assert!(h.clients.messages_of("MANDATORY_UPDATE").is_empty());

    let after = h.clients.lifecycle();
    assert_eq!(after.skipped_waiting, before.skipped_waiting + 1);
    assert_eq!(after.claimed, before.claimed + 1);

    // Grace delay is 2 s
    tokio::time::sleep(Duration::from_millis(2_100)).await;
    let mandatory = h.clients.messages_of("MANDATORY_UPDATE");
    assert_eq!(mandatory.len(), 1);
    match &mandatory[0].1 {
        OutboundMessage::MandatoryUpdate { data } => assert_eq!(data.new_version, "2.3.0"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn grades_push_then_click() {
    let h = activated_worker().await;

    let push = Bytes::from_static(br#"{"data":{"type":"grades","page":"grades","childId":"42"}}"#);
    let outcome = h.worker.dispatch(WorkerEvent::Push(push)).await;
    match outcome {
        EventResult::Push(PushOutcome::Displayed { tag, badge_count }) => {
            assert_eq!(tag, "grades");
            assert_eq!(badge_count, 1);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(h.worker.badge().get(), 1);
    assert_eq!(h.clients.messages_of("BACKGROUND_NOTIFICATION").len(), 1);

    let notification = h.surface.shown().remove(0);
    assert_eq!(notification.tag(), "grades");

    let click = h
        .worker
        .dispatch(WorkerEvent::NotificationClick {
            notification,
            action: None,
        })
        .await;
    match click {
        EventResult::Click(ClickOutcome::Focused { url, .. }) => {
            assert!(url.contains("page=grades&child=42&type=grades"), "{url}");
        }
        other => panic!("unexpected {other:?}"),
    }

    let clicked = h.clients.messages_of("NOTIFICATION_CLICKED");
    assert_eq!(clicked.len(), 1);
    assert_eq!(h.worker.badge().get(), 0);
    assert!(h.surface.shown().is_empty());
}

#[tokio::test(start_paused = true)]
async fn click_without_open_window_opens_deep_link() {
    init_tracing();
    let network = Arc::new(ScriptedNetwork::new());
    let clients = Arc::new(MemoryClients::new());
    let surface = Arc::new(MemorySurface::new());
    let worker = ServiceWorker::new(WorkerConfig::default(), host(network, clients.clone(), surface.clone())).unwrap();

    worker
        .dispatch(WorkerEvent::Push(Bytes::from_static(
            br#"{"data":{"type":"grades","page":"grades","childId":"42"}}"#,
        )))
        .await;
    let notification = surface.shown().remove(0);

    let click = worker
        .dispatch(WorkerEvent::NotificationClick {
            notification,
            action: Some("open".into()),
        })
        .await;
    assert!(matches!(click, EventResult::Click(ClickOutcome::Opened { .. })));
    assert_eq!(
        clients.opened()[0].as_str(),
        "http://localhost:8080/parent.html?page=grades&child=42&type=grades"
    );
    assert_eq!(clients.messages_of("NOTIFICATION_CLICKED").len(), 1);
    assert_eq!(worker.badge().get(), 0);
}

#[tokio::test]
async fn cached_asset_never_reaches_network() {
    let h = activated_worker().await;
    let hits_before = h.network.hits(ICON);
    assert_eq!(hits_before, 1);

    let request = Request::get(Url::parse(ICON).unwrap()).destination(Destination::Image);
    let outcome = h.worker.dispatch(WorkerEvent::Fetch(request)).await;

    let response = match outcome {
        EventResult::Fetch(RouteOutcome::Respond(response)) => response,
        other => panic!("unexpected {other:?}"),
    };
    assert!(response.from_cache);
    assert_eq!(&response.body[..], ICON_BYTES);
    assert_eq!(h.network.hits(ICON), hits_before);
}

#[tokio::test]
async fn replacement_worker_serves_and_sweeps_previous_generation() {
    let h = activated_worker().await;
    assert_eq!(h.worker.cache_names().await, vec!["colombe-cache-v2.2.0".to_string()]);

    // The release ships while the old instance is running
    h.network.respond(MANIFEST, StatusCode::OK, manifest("2.3.0", false));
    h.worker.retire().await;
    assert_eq!(h.worker.state().await, ServiceWorkerState::Redundant);

    let next = ServiceWorker::new(WorkerConfig::default(), h.host.clone()).unwrap();
    assert_eq!(next.cache_names().await, vec!["colombe-cache-v2.2.0".to_string()]);

    next.dispatch(WorkerEvent::Install).await;
    assert_eq!(
        next.cache_names().await,
        vec!["colombe-cache-v2.2.0".to_string(), "colombe-cache-v2.3.0".to_string()]
    );

    next.dispatch(WorkerEvent::Activate).await;
    assert_eq!(next.snapshot().await.version, "2.3.0");
    assert_eq!(next.cache_names().await, vec!["colombe-cache-v2.3.0".to_string()]);
    assert_eq!(h.worker.cache_names().await, vec!["colombe-cache-v2.3.0".to_string()]);

    h.network.set_offline(true);
    let request = Request::get(Url::parse(ICON).unwrap()).destination(Destination::Image);
    match next.dispatch(WorkerEvent::Fetch(request)).await {
        EventResult::Fetch(RouteOutcome::Respond(response)) => {
            assert!(response.from_cache);
            assert_eq!(&response.body[..], ICON_BYTES);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn replacement_worker_reads_previous_generation_before_install() {
    let h = activated_worker().await;
    h.worker.retire().await;

    // Manifest unreachable: the new instance stays on the default version
    h.network.set_offline(true);
    let next = ServiceWorker::new(WorkerConfig::default(), h.host.clone()).unwrap();
    next.dispatch(WorkerEvent::Activate).await;
    assert_eq!(next.cache_names().await, vec!["colombe-cache-v2.2.0".to_string()]);

    let request = Request::get(Url::parse(ICON).unwrap()).destination(Destination::Image);
    let response = match next.dispatch(WorkerEvent::Fetch(request)).await {
        EventResult::Fetch(RouteOutcome::Respond(response)) => response,
        other => panic!("unexpected {other:?}"),
    };
    assert!(response.from_cache);
    assert_eq!(response.status, StatusCode::OK);
}
