//! Transport layer abstraction for the batch sync endpoint.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pourlog_core::{coarsen_timestamp, DetectionMethod, UserId, VenueId, Visit};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A visit as sent to the server, without the locally generated id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitPayload {
    /// Owner of the visit.
    pub user_id: UserId,
    /// Visited venue.
    pub venue_id: VenueId,
    /// Arrival time.
    pub arrival_time: DateTime<Utc>,
    /// Departure time, absent while active.
    pub departure_time: Option<DateTime<Utc>>,
    /// Whole minutes spent, absent while active.
    pub duration_minutes: Option<i64>,
    /// Whether the visit is still ongoing.
    pub is_active: bool,
    /// How the visit was detected.
    pub detection_method: DetectionMethod,
}

impl VisitPayload {
    /// Builds the outgoing payload for `visit`, optionally coarsening its
    /// timestamps.
    pub fn from_visit(visit: &Visit, granularity: Option<Duration>) -> Self {
        let coarsen = |ts: DateTime<Utc>| match granularity {
            Some(step) => coarsen_timestamp(ts, step),
            None => ts,
        };
        Self {
            user_id: visit.user_id.clone(),
            venue_id: visit.venue_id.clone(),
            arrival_time: coarsen(visit.arrival_time),
            departure_time: visit.departure_time.map(coarsen),
            duration_minutes: visit.duration_minutes,
            is_active: visit.is_active,
            detection_method: visit.detection_method,
        }
    }
}

/// A visit as stored by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerVisit {
    /// Server-assigned id.
    pub id: String,
    /// Visit fields.
    #[serde(flatten)]
    pub visit: VisitPayload,
}

/// Body of a batch sync call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSyncRequest {
    /// Visits to upsert, in request order.
    pub visits: Vec<VisitPayload>,
}

/// Body of a batch sync response.
///
/// `visits[i]` is the stored form of the request's `visits[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSyncResponse {
    /// Stored visits, in request order.
    pub visits: Vec<ServerVisit>,
}

/// Remote batch endpoint.
///
/// A call either stores every visit in the request or fails as a whole.
pub trait VisitTransport: Send + Sync + 'static {
    /// Upserts `request.visits` and returns the stored records in request
    /// order.
    fn batch_sync(
        &self,
        request: &BatchSyncRequest,
    ) -> impl Future<Output = SyncResult<Vec<ServerVisit>>> + Send;
}

impl<T: VisitTransport> VisitTransport for Arc<T> {
    fn batch_sync(
        &self,
        request: &BatchSyncRequest,
    ) -> impl Future<Output = SyncResult<Vec<ServerVisit>>> + Send {
        (**self).batch_sync(request)
    }
}

type NaturalKey = (UserId, VenueId, DateTime<Utc>);

/// An in-memory stand-in for the visit server.
///
/// Visits are upserted by `(user_id, venue_id, arrival_time)`: a later
/// revision of the same visit keeps its server id.
#[derive(Debug, Default)]
pub struct InMemoryVisitServer {
    visits: Mutex<BTreeMap<NaturalKey, ServerVisit>>,
    next_id: AtomicU64,
    batches: AtomicU64,
}

impl InMemoryVisitServer {
    /// Creates an empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a batch, returning stored records in request order.
    pub fn handle_batch(&self, request: &BatchSyncRequest) -> Vec<ServerVisit> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        let mut visits = self.visits.lock();
        request
            .visits
            .iter()
            .map(|payload| {
                let key = (
                    payload.user_id.clone(),
                    payload.venue_id.clone(),
                    payload.arrival_time,
                );
                let id = match visits.get(&key) {
                    Some(existing) => existing.id.clone(),
                    None => format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
                };
                let stored = ServerVisit {
                    id,
                    visit: payload.clone(),
                };
                visits.insert(key, stored.clone());
                stored
            })
            .collect()
    }

    /// Returns every stored visit.
    pub fn visits(&self) -> Vec<ServerVisit> {
        self.visits.lock().values().cloned().collect()
    }

    /// Returns the number of stored visits.
    pub fn visit_count(&self) -> usize {
        self.visits.lock().len()
    }

    /// Returns the number of batches received.
    pub fn batch_count(&self) -> u64 {
        self.batches.load(Ordering::SeqCst)
    }
}

impl VisitTransport for InMemoryVisitServer {
    async fn batch_sync(&self, request: &BatchSyncRequest) -> SyncResult<Vec<ServerVisit>> {
        Ok(self.handle_batch(request))
    }
}

/// A scriptable transport for testing.
///
/// Successful calls are served by an [`InMemoryVisitServer`]. Every call is
/// recorded, including failed ones.
#[derive(Debug, Default)]
pub struct MockTransport {
    server: InMemoryVisitServer,
    requests: Mutex<Vec<(Instant, BatchSyncRequest)>>,
    scripted: Mutex<VecDeque<SyncError>>,
    failing: Mutex<Option<String>>,
    truncate_response: Mutex<bool>,
}

impl MockTransport {
    /// Creates a transport that succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next call with `error`. Scripted errors queue up.
    pub fn fail_next(&self, error: SyncError) {
        self.scripted.lock().push_back(error);
    }

    /// Fails every call with a retryable transport error until cleared.
    pub fn set_failing(&self, message: Option<&str>) {
        *self.failing.lock() = message.map(str::to_owned);
    }

    /// Drops the last record from successful responses.
    pub fn set_truncate_response(&self, truncate: bool) {
        *self.truncate_response.lock() = truncate;
    }

    /// Returns the backing server.
    pub fn server(&self) -> &InMemoryVisitServer {
        &self.server
    }

    /// Returns every request received, oldest first.
    pub fn requests(&self) -> Vec<BatchSyncRequest> {
        self.requests.lock().iter().map(|(_, r)| r.clone()).collect()
    }

    /// Returns when each request was received.
    pub fn call_times(&self) -> Vec<Instant> {
        self.requests.lock().iter().map(|(at, _)| *at).collect()
    }

    /// Returns the number of calls made.
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl VisitTransport for MockTransport {
    async fn batch_sync(&self, request: &BatchSyncRequest) -> SyncResult<Vec<ServerVisit>> {
        self.requests.lock().push((Instant::now(), request.clone()));

        if let Some(error) = self.scripted.lock().pop_front() {
            return Err(error);
        }
        if let Some(message) = self.failing.lock().clone() {
            return Err(SyncError::transport_retryable(message));
        }

        let mut stored = self.server.handle_batch(request);
        if *self.truncate_response.lock() {
            stored.pop();
        }
        Ok(stored)
    }
}
