//! Core data model: venues, positions, transitions and visits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Venue identifier.
pub type VenueId = String;

/// User identifier.
pub type UserId = String;

/// Prefix of locally generated visit ids.
const LOCAL_ID_PREFIX: &str = "local-";

/// A point on the earth in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl Coordinates {
    /// Creates a coordinate pair.
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A brewery or winery that can be visited.
///
/// Venues are supplied by the caller and never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    /// Venue id.
    pub id: VenueId,
    /// Display name, used in notifications.
    pub name: String,
    /// Latitude of the geofence center.
    pub latitude: f64,
    /// Longitude of the geofence center.
    pub longitude: f64,
    /// Per-venue geofence radius; the engine default applies when `None`.
    pub radius_meters: Option<f64>,
}

impl Venue {
    /// Creates a venue using the default geofence radius.
    pub fn new(id: impl Into<VenueId>, name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            latitude,
            longitude,
            radius_meters: None,
        }
    }

    /// Overrides the geofence radius for this venue.
    #[must_use]
    pub fn with_radius(mut self, radius_meters: f64) -> Self {
        self.radius_meters = Some(radius_meters);
        self
    }

    /// Returns the geofence center.
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

/// A single position sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Sampled location.
    pub coords: Coordinates,
    /// Horizontal accuracy in meters, if reported.
    pub accuracy: Option<f64>,
    /// When the sample was taken (not when it was observed).
    pub timestamp: DateTime<Utc>,
}

impl Position {
    /// Creates a sample without accuracy information.
    pub fn new(coords: Coordinates, timestamp: DateTime<Utc>) -> Self {
        Self {
            coords,
            accuracy: None,
            timestamp,
        }
    }

    /// Sets the reported accuracy.
    #[must_use]
    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }
}

/// Direction of a geofence boundary crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GeofenceEvent {
    /// The position moved inside the geofence.
    Enter,
    /// The position left the geofence after the dwell threshold.
    Exit,
}

/// A boundary crossing, emitted once per transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceTransition {
    /// Venue whose geofence was crossed.
    pub venue_id: VenueId,
    /// Crossing direction.
    pub event: GeofenceEvent,
    /// Timestamp of the sample that caused the crossing.
    pub timestamp: DateTime<Utc>,
    /// Sampled location.
    pub location: Coordinates,
    /// Sample accuracy in meters, if reported.
    pub accuracy: Option<f64>,
}

/// How a visit was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    /// Detected from geofence transitions.
    Auto,
    /// Started or ended by the user.
    Manual,
}

/// One continuous presence interval at a venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visit {
    /// Local id until synced, server id afterwards.
    pub id: String,
    /// Owner of the visit.
    pub user_id: UserId,
    /// Visited venue.
    pub venue_id: VenueId,
    /// Arrival time, verbatim from the originating transition.
    pub arrival_time: DateTime<Utc>,
    /// Departure time; `None` while active.
    pub departure_time: Option<DateTime<Utc>>,
    /// Whole minutes between arrival and departure; `None` while active.
    pub duration_minutes: Option<i64>,
    /// Whether the user is still at the venue.
    pub is_active: bool,
    /// How the visit was detected.
    pub detection_method: DetectionMethod,
    /// Whether the remote store holds this exact revision.
    pub synced: bool,
    /// When the record was created locally.
    pub created_at: DateTime<Utc>,
    /// When the record was last changed locally.
    pub updated_at: DateTime<Utc>,
}

impl Visit {
    /// Starts a new active visit with a locally generated id.
    pub fn begin(
        user_id: impl Into<UserId>,
        venue_id: impl Into<VenueId>,
        arrival_time: DateTime<Utc>,
        detection_method: DetectionMethod,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("{LOCAL_ID_PREFIX}{}", Uuid::new_v4()),
            user_id: user_id.into(),
            venue_id: venue_id.into(),
            arrival_time,
            departure_time: None,
            duration_minutes: None,
            is_active: true,
            detection_method,
            synced: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Ends the visit at `departure_time`.
    pub fn complete(&mut self, departure_time: DateTime<Utc>, now: DateTime<Utc>) {
        self.departure_time = Some(departure_time);
        self.duration_minutes = Some(duration_minutes(self.arrival_time, departure_time));
        self.is_active = false;
        self.synced = false;
        self.updated_at = now;
    }
}

/// Whole minutes between two instants, rounded to nearest; never negative.
pub fn duration_minutes(arrival: DateTime<Utc>, departure: DateTime<Utc>) -> i64 {
    let millis = (departure - arrival).num_milliseconds().max(0);
    (millis as f64 / 60_000.0).round() as i64
}

/// A visit lifecycle event published by the tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum VisitEvent {
    /// A visit started.
    Arrival(Visit),
    /// A visit ended.
    Departure(Visit),
}

impl VisitEvent {
    /// Returns the visit carried by the event.
    pub fn visit(&self) -> &Visit {
        match self {
            VisitEvent::Arrival(visit) | VisitEvent::Departure(visit) => visit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, h, m, s).unwrap()
    }

    #[test]
    fn duration_is_exact_minutes() {
        assert_eq!(duration_minutes(at(14, 30, 0), at(15, 45, 0)), 75);
        assert_eq!(duration_minutes(at(14, 30, 0), at(14, 30, 29)), 0);
        assert_eq!(duration_minutes(at(14, 30, 0), at(14, 30, 30)), 1);
    }

    #[test]
    fn duration_never_negative() {
        assert_eq!(duration_minutes(at(15, 0, 0), at(14, 0, 0)), 0);
    }

    #[test]
    fn begin_creates_active_local_visit() {
        let visit = Visit::begin("u-1", "v-1", at(14, 30, 0), DetectionMethod::Auto, at(14, 30, 1));
        assert!(visit.is_active);
        assert!(!visit.synced);
        assert!(visit.id.starts_with(LOCAL_ID_PREFIX));
        assert_eq!(visit.departure_time, None);
        assert_eq!(visit.duration_minutes, None);
    }

    #[test]
    fn complete_sets_departure_and_duration() {
        let mut visit =
            Visit::begin("u-1", "v-1", at(14, 30, 0), DetectionMethod::Auto, at(14, 30, 0));
        visit.synced = true;
        visit.complete(at(15, 45, 0), at(15, 45, 2));

        assert!(!visit.is_active);
        assert!(!visit.synced);
        assert_eq!(visit.departure_time, Some(at(15, 45, 0)));
        assert_eq!(visit.duration_minutes, Some(75));
        assert_eq!(visit.updated_at, at(15, 45, 2));
    }

    #[test]
    fn transition_serializes_uppercase_event() {
        let transition = GeofenceTransition {
            venue_id: "v-1".into(),
            event: GeofenceEvent::Enter,
            timestamp: at(14, 30, 0),
            location: Coordinates::new(37.7749, -122.4194),
            accuracy: Some(5.0),
        };
        let mut bytes = Vec::new();
        ciborium::into_writer(&transition, &mut bytes).unwrap();
        let decoded: GeofenceTransition = ciborium::from_reader(bytes.as_slice()).unwrap();
        assert_eq!(decoded, transition);
        assert!(bytes.windows(5).any(|w| w == b"ENTER"));
    }
}
