//! Test fixtures: venues, times, notifiers, stores and logging.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use pourlog_core::{Coordinates, NotificationHook, Position, Venue};
use pourlog_storage::{FileStore, KeyValueStore};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Center of the Anchor Brewing fixture venue.
pub const ANCHOR_CENTER: Coordinates = Coordinates::new(37.7749, -122.4194);

/// About 22 m north of [`ANCHOR_CENTER`].
pub const NEAR_ANCHOR: Coordinates = Coordinates::new(37.7751, -122.4194);

/// About 122 m north of [`ANCHOR_CENTER`].
pub const FAR_FROM_ANCHOR: Coordinates = Coordinates::new(37.7760, -122.4194);

/// Installs a `tracing` subscriber for tests.
///
/// Honors `RUST_LOG`, writes through the test harness's capture, and is
/// safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fixed reference time used by fixtures: 2024-06-01 14:30:00 UTC.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 14, 30, 0)
        .single()
        .expect("valid fixture time")
}

/// [`base_time`] plus `minutes`.
pub fn minutes_after_base(minutes: i64) -> DateTime<Utc> {
    base_time() + chrono::Duration::minutes(minutes)
}

/// A sample at `coords` taken at `timestamp`, with 5 m accuracy.
pub fn sample(coords: Coordinates, timestamp: DateTime<Utc>) -> Position {
    Position::new(coords, timestamp).with_accuracy(5.0)
}

/// A brewery with a 50 m geofence.
pub fn anchor_brewing() -> Venue {
    Venue::new(
        "anchor-brewing",
        "Anchor Brewing",
        ANCHOR_CENTER.latitude,
        ANCHOR_CENTER.longitude,
    )
    .with_radius(50.0)
}

/// A winery far from [`anchor_brewing`], using the default radius.
pub fn ridge_winery() -> Venue {
    Venue::new("ridge-winery", "Ridge Vineyards", 37.3186, -122.1413)
}

/// Both fixture venues.
pub fn sample_venues() -> Vec<Venue> {
    vec![anchor_brewing(), ridge_winery()]
}

/// A notification delivered to a [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// `notify_visit_detected`.
    Detected {
        /// Venue name.
        venue_name: String,
        /// Venue id.
        venue_id: String,
    },
    /// `notify_visit_ended`.
    Ended {
        /// Venue name.
        venue_name: String,
        /// Whole minutes.
        duration_minutes: i64,
        /// Visit id.
        visit_id: String,
    },
}

/// A notification hook that records every call.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<Notification>>,
    fail: Mutex<bool>,
}

impl RecordingNotifier {
    /// Creates a notifier that accepts every call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later call return an error (it is still recorded).
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    /// Returns every recorded call, oldest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.calls.lock().clone()
    }

    fn record(&self, notification: Notification) -> Result<(), String> {
        self.calls.lock().push(notification);
        if *self.fail.lock() {
            return Err("notification service unavailable".into());
        }
        Ok(())
    }
}

impl NotificationHook for RecordingNotifier {
    fn notify_visit_detected(&self, venue_name: &str, venue_id: &str) -> Result<(), String> {
        self.record(Notification::Detected {
            venue_name: venue_name.to_string(),
            venue_id: venue_id.to_string(),
        })
    }

    fn notify_visit_ended(
        &self,
        venue_name: &str,
        duration_minutes: i64,
        visit_id: &str,
    ) -> Result<(), String> {
        self.record(Notification::Ended {
            venue_name: venue_name.to_string(),
            duration_minutes,
            visit_id: visit_id.to_string(),
        })
    }
}

/// A temporary directory holding a file-backed store that can be reopened.
pub struct TempStoreDir {
    dir: TempDir,
}

impl TempStoreDir {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Path of the store's log file.
    pub fn path(&self) -> PathBuf {
        self.dir.path().join("pourlog.log")
    }

    /// Opens the store. Only one open handle may exist at a time.
    pub fn open(&self) -> Arc<dyn KeyValueStore> {
        Arc::new(FileStore::open(&self.path()).expect("Failed to open file store"))
    }
}

impl Default for TempStoreDir {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pourlog_core::haversine_distance;

    #[test]
    fn fixture_distances() {
        let near = haversine_distance(ANCHOR_CENTER, NEAR_ANCHOR);
        let far = haversine_distance(ANCHOR_CENTER, FAR_FROM_ANCHOR);
        assert!(near < 50.0, "near = {near}");
        assert!(far > 50.0, "far = {far}");
    }

    #[test]
    fn recording_notifier_records_failures_too() {
        let notifier = RecordingNotifier::new();
        notifier.set_failing(true);
        assert!(notifier
            .notify_visit_detected("Anchor Brewing", "anchor-brewing")
            .is_err());
        assert_eq!(notifier.notifications().len(), 1);
    }

    #[test]
    fn temp_store_reopens() {
        let dir = TempStoreDir::new();
        {
            let store = dir.open();
            store.set("k", b"v").unwrap();
        }
        assert_eq!(dir.open().get("k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
