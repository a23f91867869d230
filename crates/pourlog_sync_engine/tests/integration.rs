//! Integration tests for the sync engine driver and transports.

use chrono::{TimeZone, Utc};
use pourlog_core::{
    DetectionMethod, KvVisitStore, Session, StaticSession, SystemClock, Visit, VisitQueue,
    VisitStore,
};
use pourlog_storage::{FileStore, InMemoryStore, KeyValueStore};
use pourlog_sync_engine::{
    HttpTransport, InMemoryVisitServer, LoopbackClient, MockTransport, NetworkStatus, SyncConfig,
    SyncEngine, SyncError, VisitTransport,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::time::sleep;

fn visit(venue: &str) -> Visit {
    let t = Utc.with_ymd_and_hms(2024, 6, 1, 14, 30, 0).unwrap();
    Visit::begin("u-1", venue, t, DetectionMethod::Auto, t)
}

fn engine<K: KeyValueStore + 'static, T: VisitTransport>(
    config: SyncConfig,
    kv: K,
    transport: T,
    network: NetworkStatus,
) -> SyncEngine<KvVisitStore<K>, T> {
    SyncEngine::new(
        config,
        KvVisitStore::new(kv),
        transport,
        Arc::new(StaticSession::new(Session::authenticated("u-1"))),
        network,
        Arc::new(SystemClock),
    )
}

fn quiet_config() -> SyncConfig {
    SyncConfig::default().with_sync_interval(Duration::from_secs(3600))
}

#[tokio::test(start_paused = true)]
async fn debounce_collapses_rapid_updates() {
    let transport = Arc::new(MockTransport::new());
    let engine = engine(
        quiet_config(),
        InMemoryStore::new(),
        Arc::clone(&transport),
        NetworkStatus::online(),
    );
    engine.spawn();

    let mut v = visit("v-1");
    engine.queue_visit(&v).unwrap();
    sleep(Duration::from_secs(3)).await;
    v.complete(v.arrival_time + chrono::Duration::minutes(12), Utc::now());
    engine.queue_visit(&v).unwrap();

    sleep(Duration::from_secs(4)).await;
    assert_eq!(transport.call_count(), 0);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(transport.call_count(), 1);
    let sent = &transport.requests()[0].visits;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].duration_minutes, Some(12));

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn retries_back_off_then_give_up() {
    let transport = Arc::new(MockTransport::new());
    transport.set_failing(Some("connection refused"));
    let engine = engine(
        quiet_config(),
        InMemoryStore::new(),
        Arc::clone(&transport),
        NetworkStatus::online(),
    );
    engine.spawn();
    engine.queue_visit(&visit("v-1")).unwrap();

    sleep(Duration::from_secs(120)).await;

    let times = transport.call_times();
    assert_eq!(times.len(), 6);
    let gaps: Vec<u64> = times.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
    assert_eq!(gaps, vec![1, 2, 4, 8, 16]);

    let status = engine.status();
    assert_eq!(status.failed_count, 1);
    assert_eq!(status.pending_count, 1);
    assert_eq!(
        status.last_error.as_deref(),
        Some("transport error: connection refused")
    );

    transport.set_failing(None);
    engine.clear_failed_retries();
    assert_eq!(engine.force_sync_now().await.unwrap().pushed, 1);
    assert_eq!(engine.status().pending_count, 0);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_triggers_sync() {
    let transport = Arc::new(MockTransport::new());
    let network = NetworkStatus::offline();
    let engine = engine(
        quiet_config(),
        InMemoryStore::new(),
        Arc::clone(&transport),
        network.clone(),
    );
    engine.spawn();
    engine.queue_visit(&visit("v-1")).unwrap();

    sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.call_count(), 0);
    assert_eq!(engine.status().pending_count, 1);

    network.set_online(true);
    sleep(Duration::from_millis(10)).await;
    assert_eq!(transport.call_count(), 1);
    assert_eq!(engine.status().pending_count, 0);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn periodic_trigger_picks_up_stragglers() {
    let transport = Arc::new(MockTransport::new());
    let engine = engine(
        SyncConfig::default(),
        InMemoryStore::new(),
        Arc::clone(&transport),
        NetworkStatus::online(),
    );
    engine.spawn();

    // Written behind the engine's back, so no debounce is scheduled
    engine.store().save(&visit("v-1")).unwrap();

    sleep(Duration::from_secs(59)).await;
    assert_eq!(transport.call_count(), 0);
    sleep(Duration::from_secs(2)).await;
    assert_eq!(transport.call_count(), 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn status_updates_are_observable() {
    let transport = Arc::new(MockTransport::new());
    let engine = engine(
        quiet_config(),
        InMemoryStore::new(),
        Arc::clone(&transport),
        NetworkStatus::online(),
    );
    let mut status = engine.subscribe_status();
    engine.spawn();

    engine.queue_visit(&visit("v-1")).unwrap();
    assert!(status.has_changed().unwrap());
    assert_eq!(status.borrow_and_update().pending_count, 1);

    sleep(Duration::from_secs(6)).await;
    let latest = status.borrow_and_update().clone();
    assert_eq!(latest.pending_count, 0);
    assert!(!latest.is_syncing);
    assert!(latest.last_sync_time.is_some());

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn queued_visits_survive_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("visits.log");
    let transport = Arc::new(MockTransport::new());
    let v = visit("v-1");

    {
        let offline = engine(
            quiet_config(),
            FileStore::open(&path).unwrap(),
            Arc::clone(&transport),
            NetworkStatus::offline(),
        );
        offline.spawn();
        offline.queue_visit(&v).unwrap();
        sleep(Duration::from_secs(10)).await;
        offline.shutdown().await;
    }
    assert_eq!(transport.call_count(), 0);

    let online = engine(
        quiet_config(),
        FileStore::open(&path).unwrap(),
        Arc::clone(&transport),
        NetworkStatus::online(),
    );
    assert_eq!(online.status().pending_count, 1);
    online.spawn();
    sleep(Duration::from_secs(6)).await;

    assert_eq!(transport.call_count(), 1);
    assert!(online.store().find_by_id(&v.id).unwrap().is_none());
    assert_eq!(online.store().find_unsynced().unwrap().len(), 0);
    online.shutdown().await;
}

#[tokio::test]
async fn http_transport_round_trip() {
    let server = Arc::new(InMemoryVisitServer::new());
    let transport = HttpTransport::new(
        "https://api.pourlog.test",
        LoopbackClient::new(Arc::clone(&server)),
    )
    .with_bearer_token("token-1");
    let engine = engine(
        quiet_config(),
        InMemoryStore::new(),
        transport,
        NetworkStatus::online(),
    );

    let mut v = visit("v-1");
    engine.queue_visit(&v).unwrap();
    engine.force_sync_now().await.unwrap();

    v.complete(v.arrival_time + chrono::Duration::minutes(45), Utc::now());
    engine.queue_visit(&v).unwrap();
    engine.force_sync_now().await.unwrap();

    assert_eq!(server.batch_count(), 2);
    let stored = server.visits();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].visit.duration_minutes, Some(45));

    let local = engine.store().find_by_id(&stored[0].id).unwrap().unwrap();
    assert!(local.synced);
    assert!(!local.is_active);
}

#[tokio::test]
async fn rejected_credentials_surface_in_status() {
    let transport = HttpTransport::new(
        "https://api.pourlog.test",
        LoopbackClient::new(InMemoryVisitServer::new()),
    );
    let engine = engine(quiet_config(), InMemoryStore::new(), transport, NetworkStatus::online());
    engine.queue_visit(&visit("v-1")).unwrap();

    assert!(matches!(
        engine.force_sync_now().await,
        Err(SyncError::Unauthenticated)
    ));
    assert_eq!(
        engine.status().last_error.as_deref(),
        Some("not authenticated")
    );
    assert_eq!(engine.status().pending_count, 1);
}
