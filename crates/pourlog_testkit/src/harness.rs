//! A fully wired detection pipeline for end-to-end tests.
//!
//! ```text
//! MockPositionSource ──► GeofenceEngine ──► VisitTracker ──► SyncEngine ──► MockTransport
//! ```
//!
//! Every component shares one [`ManualClock`] and one key-value store, so a
//! test controls wall-clock time through [`Harness::sample`] and tokio time
//! through `tokio::time::pause`.

use crate::fixtures::{base_time, init_tracing, sample, RecordingNotifier};
use chrono::{DateTime, Utc};
use pourlog_core::{
    Coordinates, CoreResult, GeofenceConfig, GeofenceEngine, KvVisitStore, ManualClock,
    MockPositionSource, Session, StaticSession, Venue, VisitEvent, VisitTracker,
};
use pourlog_storage::{InMemoryStore, KeyValueStore};
use pourlog_sync_engine::{MockTransport, NetworkStatus, SyncConfig, SyncEngine};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

/// User id the harness session is authenticated as.
pub const TEST_USER: &str = "user-1";

/// Store shared by every harness component.
pub type SharedStore = Arc<dyn KeyValueStore>;

/// Geofence engine as wired by the harness.
pub type HarnessGeofence = GeofenceEngine<MockPositionSource, SharedStore>;

/// Sync engine as wired by the harness.
pub type HarnessSync = SyncEngine<KvVisitStore<SharedStore>, Arc<MockTransport>>;

/// Visit tracker as wired by the harness.
pub type HarnessTracker = VisitTracker<HarnessSync>;

/// The detection pipeline with scriptable edges.
///
/// Must be created inside a tokio runtime: the tracker listener and the
/// sync driver are spawned immediately.
pub struct Harness {
    /// Position samples enter here.
    pub source: Arc<MockPositionSource>,
    /// Backing store for geofence and visit state.
    pub store: SharedStore,
    /// Geofence engine.
    pub geofence: Arc<HarnessGeofence>,
    /// Visit lifecycle tracker.
    pub tracker: Arc<HarnessTracker>,
    /// Sync engine.
    pub sync: HarnessSync,
    /// Remote endpoint stand-in.
    pub transport: Arc<MockTransport>,
    /// Session, authenticated as [`TEST_USER`].
    pub session: Arc<StaticSession>,
    /// Connectivity, initially online.
    pub network: NetworkStatus,
    /// Wall clock, starting at [`base_time`].
    pub clock: Arc<ManualClock>,
    /// Records notifications.
    pub notifier: Arc<RecordingNotifier>,
    listener: JoinHandle<()>,
}

impl Harness {
    /// Wires a pipeline over a fresh in-memory store with default config.
    pub fn in_memory() -> Self {
        Self::new(
            GeofenceConfig::default(),
            SyncConfig::default(),
            Arc::new(InMemoryStore::new()),
        )
    }

    /// Wires a pipeline over `store`.
    pub fn new(geofence_config: GeofenceConfig, sync_config: SyncConfig, store: SharedStore) -> Self {
        init_tracing();

        let clock = Arc::new(ManualClock::new(base_time()));
        let source = Arc::new(MockPositionSource::new());
        let transport = Arc::new(MockTransport::new());
        let session = Arc::new(StaticSession::new(Session::authenticated(TEST_USER)));
        let network = NetworkStatus::online();
        let notifier = Arc::new(RecordingNotifier::new());

        let geofence = Arc::new(GeofenceEngine::new(
            geofence_config,
            Arc::clone(&source),
            Arc::clone(&store),
            clock.clone(),
        ));
        let sync = SyncEngine::new(
            sync_config,
            KvVisitStore::new(Arc::clone(&store)),
            Arc::clone(&transport),
            session.clone(),
            network.clone(),
            clock.clone(),
        );
        let tracker = Arc::new(VisitTracker::new(
            Arc::new(sync.clone()),
            session.clone(),
            notifier.clone(),
            clock.clone(),
        ));

        let listener = tracker.spawn_listener(geofence.subscribe());
        sync.spawn();

        Self {
            source,
            store,
            geofence,
            tracker,
            sync,
            transport,
            session,
            network,
            clock,
            notifier,
            listener,
        }
    }

    /// Registers `venues` with the tracker and starts geofence tracking.
    pub async fn start_tracking(&self, venues: &[Venue]) -> CoreResult<()> {
        self.tracker.set_venues(venues);
        self.geofence.start_tracking(venues).await
    }

    /// Subscribes to arrival and departure events.
    pub fn visit_events(&self) -> UnboundedReceiver<VisitEvent> {
        self.tracker.subscribe()
    }

    /// Moves the wall clock to `at` and delivers a sample taken there.
    pub fn sample(&self, coords: Coordinates, at: DateTime<Utc>) {
        self.clock.set(at);
        self.source.push(sample(coords, at));
    }

    /// Stops the listener and the sync driver.
    ///
    /// Dropping the harness afterwards releases the store, so a file-backed
    /// store can be reopened by the next harness.
    pub async fn shutdown(self) {
        self.listener.abort();
        let _ = self.listener.await;
        self.sync.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{anchor_brewing, NEAR_ANCHOR};
    use pourlog_core::{Clock, TrackingStatus};

    #[tokio::test(start_paused = true)]
    async fn wires_an_idle_pipeline() {
        let h = Harness::in_memory();
        assert_eq!(h.geofence.status(), TrackingStatus::Idle);
        assert!(!h.tracker.has_active_visits());
        assert_eq!(h.sync.status().pending_count, 0);
        h.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sample_moves_the_clock() {
        let h = Harness::in_memory();
        h.start_tracking(&[anchor_brewing()]).await.unwrap();
        assert_eq!(h.source.active_watches(), 1);

        let at = base_time() + chrono::Duration::minutes(3);
        h.sample(NEAR_ANCHOR, at);
        assert_eq!(h.clock.now(), at);
        h.shutdown().await;
    }
}
