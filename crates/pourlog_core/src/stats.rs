//! Visit detection metrics.
//!
//! Counters are atomic so they can be read while the tracker is handling
//! events. All counters reset together via [`DetectionStats::reset`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Live detection counters owned by the tracker.
#[derive(Debug, Default)]
pub struct DetectionStats {
    /// Geofence transitions observed.
    geofence_events: AtomicU64,
    /// Visits created, automatic and manual.
    visits_created: AtomicU64,
    /// ENTER events that could not become a visit.
    failed_detections: AtomicU64,
    /// Visits created manually.
    manual_visits: AtomicU64,
}

impl DetectionStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_event(&self) {
        self.geofence_events.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_created(&self) {
        self.visits_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed_detections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_manual(&self) {
        self.manual_visits.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of the counters.
    pub fn snapshot(&self) -> DetectionMetrics {
        DetectionMetrics {
            geofence_events: self.geofence_events.load(Ordering::Relaxed),
            visits_created: self.visits_created.load(Ordering::Relaxed),
            failed_detections: self.failed_detections.load(Ordering::Relaxed),
            manual_visits: self.manual_visits.load(Ordering::Relaxed),
        }
    }

    /// Resets every counter to zero.
    pub fn reset(&self) {
        self.geofence_events.store(0, Ordering::Relaxed);
        self.visits_created.store(0, Ordering::Relaxed);
        self.failed_detections.store(0, Ordering::Relaxed);
        self.manual_visits.store(0, Ordering::Relaxed);
    }
}

/// A snapshot of [`DetectionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DetectionMetrics {
    /// Geofence transitions observed.
    pub geofence_events: u64,
    /// Visits created, automatic and manual.
    pub visits_created: u64,
    /// ENTER events or manual requests that could not become a visit.
    pub failed_detections: u64,
    /// Visits created manually.
    pub manual_visits: u64,
}

impl DetectionMetrics {
    /// Percentage of creation attempts that produced a visit.
    ///
    /// Returns 100 when nothing has been attempted yet.
    pub fn success_rate(&self) -> f64 {
        let attempts = self.visits_created + self.failed_detections;
        if attempts == 0 {
            return 100.0;
        }
        self.visits_created as f64 * 100.0 / attempts as f64
    }
}
