//! Wall clock abstraction and timestamp helpers.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::time::Duration;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Used by tests to drive dwell thresholds and staleness checks
/// deterministically.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock fixed at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Sets the current time.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.write();
        *now = now.checked_add_signed(delta).unwrap_or(*now);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// Rounds `ts` to the nearest multiple of `granularity` since the epoch.
///
/// Used to blur visit times before they leave the device. A zero
/// granularity returns `ts` unchanged.
pub fn coarsen_timestamp(ts: DateTime<Utc>, granularity: Duration) -> DateTime<Utc> {
    let step = i64::try_from(granularity.as_millis()).unwrap_or(i64::MAX);
    if step == 0 {
        return ts;
    }
    let Some(shifted) = ts.timestamp_millis().checked_add(step / 2) else {
        return ts;
    };
    let rounded = shifted.div_euclid(step) * step;
    DateTime::from_timestamp_millis(rounded).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), Utc.with_ymd_and_hms(2024, 6, 1, 12, 1, 30).unwrap());
    }

    #[test]
    fn coarsen_rounds_to_nearest_step() {
        let five_min = Duration::from_secs(300);
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 14, 32, 29).unwrap();
        assert_eq!(
            coarsen_timestamp(ts, five_min),
            Utc.with_ymd_and_hms(2024, 6, 1, 14, 30, 0).unwrap()
        );

        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 14, 32, 30).unwrap();
        assert_eq!(
            coarsen_timestamp(ts, five_min),
            Utc.with_ymd_and_hms(2024, 6, 1, 14, 35, 0).unwrap()
        );
    }

    #[test]
    fn coarsen_saturates_huge_granularity() {
        let huge = Duration::from_millis(u64::MAX);
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 14, 32, 0).unwrap();
        assert_eq!(coarsen_timestamp(ts, huge), DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(
            coarsen_timestamp(DateTime::<Utc>::MAX_UTC, huge),
            DateTime::<Utc>::UNIX_EPOCH
        );
        assert_eq!(
            coarsen_timestamp(DateTime::<Utc>::MIN_UTC, huge),
            DateTime::<Utc>::UNIX_EPOCH
        );
    }

    #[test]
    fn coarsen_zero_is_identity() {
        let ts = Utc.timestamp_millis_opt(1_717_250_000_123).unwrap();
        assert_eq!(coarsen_timestamp(ts, Duration::ZERO), ts);
    }
}
