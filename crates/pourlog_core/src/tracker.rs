//! Visit lifecycle tracker.
//!
//! Maps geofence transitions onto a per-venue state machine:
//!
//! ```text
//!            ENTER / create_manual_visit
//!   NoVisit ─────────────────────────────► Active
//!      ▲                                     │
//!      └─────────────────────────────────────┘
//!            EXIT / end_visit
//! ```
//!
//! ENTER while Active and EXIT while NoVisit are dropped. Each completed
//! cycle is one [`Visit`]; the next ENTER starts a fresh one.

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::feed::EventFeed;
use crate::notify::NotificationHook;
use crate::session::SessionProvider;
use crate::stats::{DetectionMetrics, DetectionStats};
use crate::store::VisitQueue;
use crate::types::{
    DetectionMethod, GeofenceEvent, GeofenceTransition, Venue, VenueId, Visit, VisitEvent,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Owns the active visit per venue and turns transitions into visits.
pub struct VisitTracker<Q: VisitQueue> {
    queue: Arc<Q>,
    session: Arc<dyn SessionProvider>,
    notifier: Arc<dyn NotificationHook>,
    clock: Arc<dyn Clock>,
    venues: RwLock<HashMap<VenueId, Venue>>,
    active: Mutex<HashMap<VenueId, Visit>>,
    stats: DetectionStats,
    events: EventFeed<VisitEvent>,
}

impl<Q: VisitQueue + 'static> VisitTracker<Q> {
    /// Creates a tracker with no known venues and no active visits.
    pub fn new(
        queue: Arc<Q>,
        session: Arc<dyn SessionProvider>,
        notifier: Arc<dyn NotificationHook>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            session,
            notifier,
            clock,
            venues: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            stats: DetectionStats::new(),
            events: EventFeed::new(),
        }
    }

    /// Replaces the set of known venues.
    pub fn set_venues(&self, venues: &[Venue]) {
        let mut known = self.venues.write();
        known.clear();
        known.extend(venues.iter().map(|v| (v.id.clone(), v.clone())));
    }

    /// Subscribes to arrival and departure events emitted from now on.
    pub fn subscribe(&self) -> UnboundedReceiver<VisitEvent> {
        self.events.subscribe()
    }

    /// Handles transitions from `transitions` until the channel closes.
    pub async fn run(&self, mut transitions: UnboundedReceiver<GeofenceTransition>) {
        while let Some(transition) = transitions.recv().await {
            self.handle_transition(&transition);
        }
        debug!("transition stream closed");
    }

    /// Spawns [`Self::run`] on the current runtime.
    pub fn spawn_listener(
        self: &Arc<Self>,
        transitions: UnboundedReceiver<GeofenceTransition>,
    ) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move { tracker.run(transitions).await })
    }

    /// Applies one transition. Returns the lifecycle event it produced.
    pub fn handle_transition(&self, transition: &GeofenceTransition) -> Option<VisitEvent> {
        self.stats.record_event();
        match transition.event {
            GeofenceEvent::Enter => self.on_enter(transition),
            GeofenceEvent::Exit => self.on_exit(&transition.venue_id, transition.timestamp),
        }
    }

    fn on_enter(&self, transition: &GeofenceTransition) -> Option<VisitEvent> {
        let venue_id = transition.venue_id.as_str();
        let mut active = self.active.lock();

        if active.contains_key(venue_id) {
            debug!(venue_id, "duplicate ENTER for active visit, ignoring");
            return None;
        }

        let Some(venue) = self.venue(venue_id) else {
            warn!(venue_id, "ENTER for unknown venue, dropping");
            self.stats.record_failed();
            return None;
        };

        let Some(user_id) = self.session.current_session().user_id().map(str::to_owned) else {
            warn!(venue_id, "ENTER without authenticated user, dropping");
            self.stats.record_failed();
            return None;
        };

        let visit = Visit::begin(
            user_id,
            venue_id,
            transition.timestamp,
            DetectionMethod::Auto,
            self.clock.now(),
        );
        let queued = self.begin_locked(&mut active, visit);
        drop(active);

        match queued {
            Ok(visit) => Some(self.announce_arrival(visit, &venue)),
            Err(e) => {
                error!(venue_id, error = %e, "failed to queue new visit");
                self.stats.record_failed();
                None
            }
        }
    }

    fn on_exit(&self, venue_id: &str, departure_time: DateTime<Utc>) -> Option<VisitEvent> {
        let mut active = self.active.lock();

        let Some(current) = active.get(venue_id) else {
            debug!(venue_id, "EXIT without active visit, ignoring");
            return None;
        };

        let mut visit = current.clone();
        visit.complete(departure_time, self.clock.now());

        if let Err(e) = self.queue.queue_visit(&visit) {
            // The slot stays occupied so a later EXIT or end_visit can retry
            error!(venue_id, visit_id = %visit.id, error = %e, "failed to queue completed visit");
            return None;
        }
        active.remove(venue_id);
        drop(active);

        let duration = visit.duration_minutes.unwrap_or_default();
        info!(venue_id, visit_id = %visit.id, duration_minutes = duration, "visit ended");

        let venue_name = self
            .venue(venue_id)
            .map(|v| v.name)
            .unwrap_or_else(|| venue_id.to_string());
        if let Err(e) = self
            .notifier
            .notify_visit_ended(&venue_name, duration, &visit.id)
        {
            warn!(venue_id, error = %e, "visit-ended notification failed");
        }

        let event = VisitEvent::Departure(visit);
        self.events.emit(event.clone());
        Some(event)
    }

    fn begin_locked(
        &self,
        active: &mut HashMap<VenueId, Visit>,
        visit: Visit,
    ) -> CoreResult<Visit> {
        self.queue.queue_visit(&visit)?;
        active.insert(visit.venue_id.clone(), visit.clone());
        Ok(visit)
    }

    /// Runs the arrival side effects. Must be called without `active` held.
    fn announce_arrival(&self, visit: Visit, venue: &Venue) -> VisitEvent {
        self.stats.record_created();

        info!(
            venue_id = %visit.venue_id,
            visit_id = %visit.id,
            method = ?visit.detection_method,
            arrival = %visit.arrival_time,
            "visit started"
        );

        if let Err(e) = self.notifier.notify_visit_detected(&venue.name, &venue.id) {
            warn!(venue_id = %venue.id, error = %e, "visit-detected notification failed");
        }

        let event = VisitEvent::Arrival(visit);
        self.events.emit(event.clone());
        event
    }

    /// Starts a visit on the user's request, bypassing geofence state.
    ///
    /// Returns the already-active visit if one exists for the venue.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownVenue`], [`CoreError::Unauthenticated`],
    /// or the error from queueing the visit.
    pub fn create_manual_visit(&self, venue_id: &str) -> CoreResult<Visit> {
        let Some(venue) = self.venue(venue_id) else {
            self.stats.record_failed();
            return Err(CoreError::UnknownVenue(venue_id.to_string()));
        };

        let Some(user_id) = self.session.current_session().user_id().map(str::to_owned) else {
            self.stats.record_failed();
            return Err(CoreError::Unauthenticated);
        };

        let mut active = self.active.lock();
        if let Some(existing) = active.get(venue_id) {
            debug!(venue_id, "manual visit requested while active");
            return Ok(existing.clone());
        }

        let now = self.clock.now();
        let visit = Visit::begin(user_id, venue_id, now, DetectionMethod::Manual, now);
        let queued = self.begin_locked(&mut active, visit);
        drop(active);

        match queued {
            Ok(visit) => {
                self.stats.record_manual();
                Ok(self.announce_arrival(visit, &venue).visit().clone())
            }
            Err(e) => {
                self.stats.record_failed();
                Err(e)
            }
        }
    }

    /// Ends the venue's active visit now, on the user's request.
    ///
    /// Returns `None` if no visit was active or the completed visit could
    /// not be queued.
    pub fn end_visit(&self, venue_id: &str) -> Option<Visit> {
        self.on_exit(venue_id, self.clock.now())
            .map(|event| event.visit().clone())
    }

    /// Rebuilds the active-visit map from local storage, for use after a
    /// restart. Returns the number of visits restored.
    ///
    /// # Errors
    ///
    /// Returns an error if local storage cannot be read.
    pub fn restore_active_visits(&self) -> CoreResult<usize> {
        let Some(user_id) = self.session.current_session().user_id().map(str::to_owned) else {
            return Ok(0);
        };

        let stored = self.queue.active_visits(&user_id)?;
        let mut active = self.active.lock();
        let before = active.len();

        for visit in stored {
            let newer = active
                .get(&visit.venue_id)
                .map_or(true, |current| visit.updated_at > current.updated_at);
            if newer {
                active.insert(visit.venue_id.clone(), visit);
            }
        }

        let restored = active.len() - before;
        info!(restored, "restored active visits");
        Ok(restored)
    }

    /// Returns the venue's active visit.
    pub fn active_visit(&self, venue_id: &str) -> Option<Visit> {
        self.active.lock().get(venue_id).cloned()
    }

    /// Returns every active visit.
    pub fn all_active_visits(&self) -> Vec<Visit> {
        let mut visits: Vec<Visit> = self.active.lock().values().cloned().collect();
        visits.sort_by(|a, b| a.arrival_time.cmp(&b.arrival_time));
        visits
    }

    /// Returns `true` if any visit is active.
    pub fn has_active_visits(&self) -> bool {
        !self.active.lock().is_empty()
    }

    /// Returns a snapshot of the detection counters.
    pub fn metrics(&self) -> DetectionMetrics {
        self.stats.snapshot()
    }

    /// Resets the detection counters.
    pub fn reset_metrics(&self) {
        self.stats.reset();
    }

    fn venue(&self, venue_id: &str) -> Option<Venue> {
        self.venues.read().get(venue_id).cloned()
    }
}
