//! Configuration for geofence evaluation.

use std::time::Duration;

/// What to do when a position leaves a geofence before the dwell threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitPolicy {
    /// Keep `entered_at` and re-evaluate on the next sample, so a brief
    /// signal dropout does not end an ongoing visit.
    #[default]
    RetainState,
    /// Forget `entered_at` and treat the candidate visit as noise.
    ResetState,
}

/// Configuration for the geofence engine.
#[derive(Debug, Clone)]
pub struct GeofenceConfig {
    /// Default geofence radius, used when a venue has no override.
    pub radius_meters: f64,
    /// Minimum time inside before an EXIT may be emitted.
    pub dwell_threshold: Duration,
    /// Interval of the fallback position poll.
    pub sample_interval: Duration,
    /// Handling of exits below the dwell threshold.
    pub exit_policy: ExitPolicy,
    /// Persisted paused state older than this is discarded on reload.
    pub stale_state_age: Duration,
    /// Samples reporting a worse accuracy than this are ignored.
    pub max_accuracy_meters: Option<f64>,
    /// Whether to request high-accuracy positions from the source.
    pub high_accuracy: bool,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            radius_meters: 100.0,
            dwell_threshold: Duration::from_secs(10 * 60),
            sample_interval: Duration::from_secs(30),
            exit_policy: ExitPolicy::RetainState,
            stale_state_age: Duration::from_secs(24 * 60 * 60),
            max_accuracy_meters: None,
            high_accuracy: true,
        }
    }
}

impl GeofenceConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default geofence radius.
    #[must_use]
    pub fn with_radius(mut self, radius_meters: f64) -> Self {
        self.radius_meters = radius_meters;
        self
    }

    /// Sets the dwell threshold.
    #[must_use]
    pub fn with_dwell_threshold(mut self, threshold: Duration) -> Self {
        self.dwell_threshold = threshold;
        self
    }

    /// Sets the fallback poll interval.
    #[must_use]
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Sets the exit policy.
    #[must_use]
    pub fn with_exit_policy(mut self, policy: ExitPolicy) -> Self {
        self.exit_policy = policy;
        self
    }

    /// Sets the age after which persisted state is considered stale.
    #[must_use]
    pub fn with_stale_state_age(mut self, age: Duration) -> Self {
        self.stale_state_age = age;
        self
    }

    /// Ignores samples whose accuracy is worse than `meters`.
    #[must_use]
    pub fn with_max_accuracy(mut self, meters: f64) -> Self {
        self.max_accuracy_meters = Some(meters);
        self
    }
}
