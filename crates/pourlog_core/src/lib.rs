//! # pourlog core
//!
//! Venue visit detection for pourlog.
//!
//! This crate provides:
//! - The data model (venues, positions, geofence transitions, visits)
//! - A geofence engine that turns position samples into ENTER/EXIT events
//! - A visit lifecycle tracker that turns those events into visit records
//! - The ports the engine talks through (position source, local visit
//!   store, session, notifications, clock)
//!
//! ## Architecture
//!
//! ```text
//! PositionSource ──► GeofenceEngine ──► VisitTracker ──► VisitQueue
//!                     (ENTER/EXIT)       (arrival/        (sync engine,
//!                                         departure)       local store)
//! ```
//!
//! Each component owns its state and publishes its output on an
//! [`EventFeed`]. Nothing downstream mutates upstream state.
//!
//! ## Key Invariants
//!
//! - At most one active visit per (user, venue)
//! - EXIT is never emitted below the dwell threshold
//! - Visit timestamps are the originating sample timestamps, unrounded
//! - A visit that cannot be durably queued is not tracked

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod error;
mod feed;
mod geo;
mod geofence;
mod notify;
mod position;
mod session;
mod stats;
mod store;
mod tracker;
mod types;

pub use clock::{coarsen_timestamp, Clock, ManualClock, SystemClock};
pub use config::{ExitPolicy, GeofenceConfig};
pub use error::{CoreError, CoreResult};
pub use feed::EventFeed;
pub use geo::{haversine_distance, EARTH_RADIUS_METERS};
pub use geofence::{GeofenceEngine, GeofenceState, PendingGeofence, TrackingStatus, PAUSED_STATE_KEY};
pub use notify::{NoopNotifier, NotificationHook};
pub use position::{
    MockPositionSource, Permission, PositionSink, PositionSource, WatchHandle, WatchOptions,
};
pub use session::{Session, SessionProvider, StaticSession};
pub use stats::{DetectionMetrics, DetectionStats};
pub use store::{KvVisitStore, VisitQueue, VisitStore, VISIT_KEY_PREFIX};
pub use tracker::VisitTracker;
pub use types::{
    duration_minutes, Coordinates, DetectionMethod, GeofenceEvent, GeofenceTransition, Position,
    UserId, Venue, VenueId, Visit, VisitEvent,
};
