//! Geofence engine.
//!
//! Turns a stream of position samples into ENTER/EXIT transitions per
//! registered venue.
//!
//! ## Evaluation
//!
//! For every sample and every geofence:
//!
//! | inside | was inside | result |
//! |--------|------------|--------|
//! | yes    | no         | ENTER, `entered_at = sample time` |
//! | yes    | yes        | `last_check` only |
//! | no     | yes        | EXIT if dwell >= threshold, else [`ExitPolicy`] |
//! | no     | no         | nothing |
//!
//! Dwell is measured between sample timestamps, never against the time the
//! engine happened to observe the sample.
//!
//! ## Sampling
//!
//! While tracking, samples arrive from a continuous watch and from a
//! periodic fallback poll. Out-of-band samples (for example a platform
//! background callback) enter through [`GeofenceEngine::update_position`].
//! All three paths share one evaluation routine.

use crate::clock::Clock;
use crate::config::{ExitPolicy, GeofenceConfig};
use crate::error::{CoreError, CoreResult};
use crate::feed::EventFeed;
use crate::geo::haversine_distance;
use crate::position::{PositionSource, WatchHandle, WatchOptions};
use crate::types::{Coordinates, GeofenceEvent, GeofenceTransition, Position, Venue, VenueId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pourlog_storage::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Key under which paused geofence state is persisted.
pub const PAUSED_STATE_KEY: &str = "geofence/paused_state";

/// Boundary state of one venue's geofence.
#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceState {
    /// Venue id.
    pub venue_id: VenueId,
    /// Geofence center.
    pub center: Coordinates,
    /// Geofence radius.
    pub radius_meters: f64,
    /// Sample time of the ENTER; present iff currently inside.
    pub entered_at: Option<DateTime<Utc>>,
    /// Sample time of the last evaluation.
    pub last_check: Option<DateTime<Utc>>,
}

impl GeofenceState {
    fn from_venue(venue: &Venue, default_radius: f64) -> Self {
        Self {
            venue_id: venue.id.clone(),
            center: venue.coordinates(),
            radius_meters: venue.radius_meters.unwrap_or(default_radius),
            entered_at: None,
            last_check: None,
        }
    }

    /// Returns `true` if the position is currently considered inside.
    pub fn is_inside(&self) -> bool {
        self.entered_at.is_some()
    }
}

/// A geofence that has been entered but not yet held for the dwell threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingGeofence {
    /// Venue id.
    pub venue_id: VenueId,
    /// Sample time of the ENTER.
    pub entered_at: DateTime<Utc>,
}

/// Sampling state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingStatus {
    /// Not sampling; no entered state.
    Idle,
    /// Sampling.
    Tracking,
    /// Not sampling; entered state preserved.
    Paused,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    saved_at: DateTime<Utc>,
    entries: Vec<PersistedEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    venue_id: VenueId,
    entered_at: DateTime<Utc>,
    last_check: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct EngineState {
    geofences: BTreeMap<VenueId, GeofenceState>,
    last_position: Option<Position>,
    status: TrackingStatus,
}

#[derive(Debug)]
struct SamplingTasks {
    watch: WatchHandle,
    handles: Vec<JoinHandle<()>>,
}

/// Converts position samples into geofence transitions.
///
/// The engine exclusively owns per-venue boundary state; callers read it
/// through accessors and observe changes through [`GeofenceEngine::subscribe`].
pub struct GeofenceEngine<P: PositionSource, K: KeyValueStore + 'static> {
    config: GeofenceConfig,
    source: Arc<P>,
    persistence: K,
    clock: Arc<dyn Clock>,
    state: Mutex<EngineState>,
    transitions: EventFeed<GeofenceTransition>,
    sampling: Mutex<Option<SamplingTasks>>,
}

impl<P: PositionSource, K: KeyValueStore + 'static> GeofenceEngine<P, K> {
    /// Creates an idle engine with no geofences.
    ///
    /// `persistence` holds paused state across process restarts.
    pub fn new(
        config: GeofenceConfig,
        source: Arc<P>,
        persistence: K,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            source,
            persistence,
            clock,
            state: Mutex::new(EngineState {
                geofences: BTreeMap::new(),
                last_position: None,
                status: TrackingStatus::Idle,
            }),
            transitions: EventFeed::new(),
            sampling: Mutex::new(None),
        }
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &GeofenceConfig {
        &self.config
    }

    /// Subscribes to transitions emitted from now on.
    pub fn subscribe(&self) -> UnboundedReceiver<GeofenceTransition> {
        self.transitions.subscribe()
    }

    /// Replaces the monitored set with `venues`.
    ///
    /// Venues already monitored keep their entered state; venues no longer
    /// listed are dropped without an EXIT.
    pub fn register(&self, venues: &[Venue]) {
        let mut state = self.state.lock();
        state
            .geofences
            .retain(|id, _| venues.iter().any(|v| &v.id == id));
        for venue in venues {
            self.upsert(&mut state.geofences, venue);
        }
        debug!(count = state.geofences.len(), "registered geofences");
    }

    /// Adds or updates one geofence, effective on the next sample.
    pub fn add_geofence(&self, venue: &Venue) {
        let mut state = self.state.lock();
        self.upsert(&mut state.geofences, venue);
    }

    /// Stops monitoring a venue. No EXIT is emitted.
    pub fn remove_geofence(&self, venue_id: &str) -> bool {
        let removed = self.state.lock().geofences.remove(venue_id);
        if let Some(geofence) = &removed {
            if geofence.is_inside() {
                debug!(venue_id, "removed geofence while inside");
            }
        }
        removed.is_some()
    }

    fn upsert(&self, geofences: &mut BTreeMap<VenueId, GeofenceState>, venue: &Venue) {
        let fresh = GeofenceState::from_venue(venue, self.config.radius_meters);
        let (center, radius_meters) = (fresh.center, fresh.radius_meters);
        geofences
            .entry(venue.id.clone())
            .and_modify(|existing| {
                existing.center = center;
                existing.radius_meters = radius_meters;
            })
            .or_insert(fresh);
    }

    /// Starts sampling and registers `venues`.
    ///
    /// Recovers entered state persisted by an earlier [`Self::pause_tracking`],
    /// including one from a previous process.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PermissionDenied`] if location permission has not
    /// been granted; callers must request it first.
    pub async fn start_tracking(self: &Arc<Self>, venues: &[Venue]) -> CoreResult<()> {
        self.ensure_permission().await?;

        self.cancel_sampling();
        self.register(venues);
        let restored = self.restore_persisted_state()?;
        self.start_sampling()?;
        self.state.lock().status = TrackingStatus::Tracking;

        info!(venues = venues.len(), restored, "geofence tracking started");
        Ok(())
    }

    /// Stops sampling and clears all entered state.
    pub fn stop_tracking(&self) {
        self.cancel_sampling();
        {
            let mut state = self.state.lock();
            for geofence in state.geofences.values_mut() {
                geofence.entered_at = None;
                geofence.last_check = None;
            }
            state.status = TrackingStatus::Idle;
        }
        if let Err(e) = self.persistence.remove(PAUSED_STATE_KEY) {
            warn!(error = %e, "failed to clear persisted geofence state");
        }
        info!("geofence tracking stopped");
    }

    /// Stops sampling but keeps entered state, persisting it durably.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be persisted. Sampling is
    /// stopped regardless.
    pub fn pause_tracking(&self) -> CoreResult<()> {
        self.cancel_sampling();
        self.state.lock().status = TrackingStatus::Paused;
        let persisted = self.persist_state()?;
        info!(persisted, "geofence tracking paused");
        Ok(())
    }

    /// Restarts sampling after a pause.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PermissionDenied`] if permission was revoked
    /// while paused.
    pub async fn resume_tracking(self: &Arc<Self>) -> CoreResult<()> {
        if self.status() == TrackingStatus::Tracking {
            return Ok(());
        }
        self.ensure_permission().await?;

        let restored = self.restore_persisted_state()?;
        self.start_sampling()?;
        self.state.lock().status = TrackingStatus::Tracking;

        info!(restored, "geofence tracking resumed");
        Ok(())
    }

    /// Evaluates a sample delivered out-of-band.
    ///
    /// Returns the transitions it caused, which are also published.
    pub fn update_position(&self, position: Position) -> Vec<GeofenceTransition> {
        self.process_position(position)
    }

    /// Returns the current sampling state.
    pub fn status(&self) -> TrackingStatus {
        self.state.lock().status
    }

    /// Returns `true` if any geofence is currently entered.
    pub fn is_inside_any_geofence(&self) -> bool {
        self.state.lock().geofences.values().any(GeofenceState::is_inside)
    }

    /// Returns the ids of entered geofences.
    pub fn active_geofence_venue_ids(&self) -> Vec<VenueId> {
        self.state
            .lock()
            .geofences
            .values()
            .filter(|g| g.is_inside())
            .map(|g| g.venue_id.clone())
            .collect()
    }

    /// Returns entered geofences whose dwell threshold has not yet elapsed.
    pub fn pending_geofences(&self) -> Vec<PendingGeofence> {
        let now = self.clock.now();
        let threshold = chrono_duration(self.config.dwell_threshold);
        self.state
            .lock()
            .geofences
            .values()
            .filter_map(|g| {
                let entered_at = g.entered_at?;
                (now - entered_at < threshold).then(|| PendingGeofence {
                    venue_id: g.venue_id.clone(),
                    entered_at,
                })
            })
            .collect()
    }

    /// Returns a copy of one venue's boundary state.
    pub fn geofence(&self, venue_id: &str) -> Option<GeofenceState> {
        self.state.lock().geofences.get(venue_id).cloned()
    }

    /// Returns the most recent accepted sample.
    pub fn last_position(&self) -> Option<Position> {
        self.state.lock().last_position
    }

    /// Distance in meters from the last known position to `venue`, or
    /// `None` if no position has been observed yet.
    pub fn calculate_distance_to_venue(&self, venue: &Venue) -> Option<f64> {
        self.last_position()
            .map(|p| haversine_distance(p.coords, venue.coordinates()))
    }

    fn process_position(&self, position: Position) -> Vec<GeofenceTransition> {
        if let (Some(max), Some(accuracy)) = (self.config.max_accuracy_meters, position.accuracy) {
            if accuracy > max {
                debug!(accuracy, max, "ignoring inaccurate sample");
                return Vec::new();
            }
        }

        let threshold = chrono_duration(self.config.dwell_threshold);
        let ts = position.timestamp;
        let mut emitted = Vec::new();

        // Emit under the lock so concurrent samples publish in evaluation order
        let mut state = self.state.lock();
        state.last_position = Some(position);

        for geofence in state.geofences.values_mut() {
            let distance = haversine_distance(position.coords, geofence.center);
            let inside = distance <= geofence.radius_meters;

            match (inside, geofence.entered_at) {
                (true, None) => {
                    geofence.entered_at = Some(ts);
                    emitted.push(transition(geofence, GeofenceEvent::Enter, &position));
                }
                (false, Some(entered_at)) => {
                    let dwell = ts - entered_at;
                    if dwell >= threshold {
                        geofence.entered_at = None;
                        emitted.push(transition(geofence, GeofenceEvent::Exit, &position));
                    } else {
                        match self.config.exit_policy {
                            ExitPolicy::RetainState => {
                                debug!(
                                    venue_id = %geofence.venue_id,
                                    dwell_secs = dwell.num_seconds(),
                                    "outside below dwell threshold, retaining state"
                                );
                            }
                            ExitPolicy::ResetState => {
                                geofence.entered_at = None;
                                debug!(
                                    venue_id = %geofence.venue_id,
                                    dwell_secs = dwell.num_seconds(),
                                    "outside below dwell threshold, discarding entry"
                                );
                            }
                        }
                    }
                }
                (true, Some(_)) | (false, None) => {}
            }
            geofence.last_check = Some(ts);
        }

        for t in &emitted {
            info!(venue_id = %t.venue_id, event = ?t.event, timestamp = %t.timestamp, "geofence transition");
            self.transitions.emit(t.clone());
        }
        emitted
    }

    async fn ensure_permission(&self) -> CoreResult<()> {
        let permission = self.source.check_permissions().await?;
        if !permission.is_granted() {
            warn!(?permission, "location permission not granted");
            return Err(CoreError::PermissionDenied(permission));
        }
        Ok(())
    }

    fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            high_accuracy: self.config.high_accuracy,
            ..WatchOptions::default()
        }
    }

    fn start_sampling(self: &Arc<Self>) -> CoreResult<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watch = self.source.watch_position(self.watch_options(), tx)?;

        let weak: Weak<Self> = Arc::downgrade(self);
        let watcher = tokio::spawn(async move {
            while let Some(position) = rx.recv().await {
                let Some(engine) = weak.upgrade() else { break };
                engine.process_position(position);
            }
        });

        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.config.sample_interval;
        let poller = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(engine) = weak.upgrade() else { break };
                match engine.source.current_position().await {
                    Ok(Some(position)) => {
                        engine.process_position(position);
                    }
                    Ok(None) => debug!("poll returned no position"),
                    Err(e) => warn!(error = %e, "position poll failed"),
                }
            }
        });

        *self.sampling.lock() = Some(SamplingTasks {
            watch,
            handles: vec![watcher, poller],
        });
        Ok(())
    }

    fn cancel_sampling(&self) {
        if let Some(tasks) = self.sampling.lock().take() {
            self.source.clear_watch(tasks.watch);
            for handle in tasks.handles {
                handle.abort();
            }
        }
    }

    fn persist_state(&self) -> CoreResult<usize> {
        let entries: Vec<PersistedEntry> = self
            .state
            .lock()
            .geofences
            .values()
            .filter_map(|g| {
                g.entered_at.map(|entered_at| PersistedEntry {
                    venue_id: g.venue_id.clone(),
                    entered_at,
                    last_check: g.last_check,
                })
            })
            .collect();

        if entries.is_empty() {
            self.persistence.remove(PAUSED_STATE_KEY)?;
            return Ok(0);
        }

        let count = entries.len();
        let snapshot = PersistedState {
            saved_at: self.clock.now(),
            entries,
        };
        let mut bytes = Vec::new();
        ciborium::into_writer(&snapshot, &mut bytes).map_err(CoreError::codec)?;
        self.persistence.set(PAUSED_STATE_KEY, &bytes)?;
        Ok(count)
    }

    /// Consumes the persisted snapshot, merging it into registered geofences
    /// that are not already entered. Entries older than the stale age are
    /// discarded.
    fn restore_persisted_state(&self) -> CoreResult<usize> {
        let Some(bytes) = self.persistence.get(PAUSED_STATE_KEY)? else {
            return Ok(0);
        };
        self.persistence.remove(PAUSED_STATE_KEY)?;
        let snapshot: PersistedState = match ciborium::from_reader(bytes.as_slice()) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "discarding unreadable geofence state");
                return Ok(0);
            }
        };

        let now = self.clock.now();
        debug!(saved_at = %snapshot.saved_at, entries = snapshot.entries.len(), "loaded paused geofence state");
        let max_age = chrono_duration(self.config.stale_state_age);
        let mut restored = 0;
        let mut state = self.state.lock();

        for entry in snapshot.entries {
            if now - entry.entered_at > max_age {
                debug!(venue_id = %entry.venue_id, "discarding stale geofence state");
                continue;
            }
            match state.geofences.get_mut(&entry.venue_id) {
                Some(geofence) if geofence.entered_at.is_none() => {
                    geofence.entered_at = Some(entry.entered_at);
                    geofence.last_check = entry.last_check;
                    restored += 1;
                }
                Some(_) => {}
                None => debug!(venue_id = %entry.venue_id, "persisted state for unregistered venue"),
            }
        }
        Ok(restored)
    }
}

impl<P: PositionSource, K: KeyValueStore + 'static> Drop for GeofenceEngine<P, K> {
    fn drop(&mut self) {
        self.cancel_sampling();
    }
}

fn transition(geofence: &GeofenceState, event: GeofenceEvent, position: &Position) -> GeofenceTransition {
    GeofenceTransition {
        venue_id: geofence.venue_id.clone(),
        event,
        timestamp: position.timestamp,
        location: position.coords,
        accuracy: position.accuracy,
    }
}

fn chrono_duration(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}
