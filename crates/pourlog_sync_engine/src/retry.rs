//! Per-record retry bookkeeping.

use crate::config::RetryConfig;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// Retry progress of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    /// Consecutive failed pushes.
    pub failures: u32,
    /// Delay before the next retry.
    pub next_delay: Duration,
    /// Error of the most recent failure.
    pub last_error: String,
}

/// What to do with a record after a failed push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the delay.
    RetryAfter(Duration),
    /// Stop retrying automatically.
    GiveUp,
}

/// Tracks retry state for every record that has failed to push.
///
/// Records that exhaust their retries move to a failed set and are left out
/// of automatic batches until [`RetryTracker::clear_failed`] or until they
/// are requeued.
#[derive(Debug)]
pub struct RetryTracker {
    config: RetryConfig,
    states: HashMap<String, RetryState>,
    failed: BTreeSet<String>,
}

impl RetryTracker {
    /// Creates an empty tracker.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
            failed: BTreeSet::new(),
        }
    }

    /// Advances the record's retry state after a failed push.
    pub fn record_failure(&mut self, id: &str, error: &str) -> RetryDecision {
        let state = self.states.entry(id.to_string()).or_insert(RetryState {
            failures: 0,
            next_delay: Duration::ZERO,
            last_error: String::new(),
        });
        state.failures += 1;
        state.last_error = error.to_string();

        if self.config.is_exhausted(state.failures) {
            state.next_delay = Duration::ZERO;
            self.failed.insert(id.to_string());
            return RetryDecision::GiveUp;
        }

        state.next_delay = self.config.delay_for_attempt(state.failures);
        RetryDecision::RetryAfter(state.next_delay)
    }

    /// Forgets everything about the record.
    pub fn clear(&mut self, id: &str) {
        self.states.remove(id);
        self.failed.remove(id);
    }

    /// Returns `true` if the record has given up.
    pub fn is_failed(&self, id: &str) -> bool {
        self.failed.contains(id)
    }

    /// Returns the record's retry state.
    pub fn state(&self, id: &str) -> Option<&RetryState> {
        self.states.get(id)
    }

    /// Returns the number of records that have given up.
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Returns the ids of records that have given up.
    pub fn failed_ids(&self) -> Vec<String> {
        self.failed.iter().cloned().collect()
    }

    /// Resets every given-up record so it is retried again. Returns how
    /// many were reset.
    pub fn clear_failed(&mut self) -> usize {
        let failed = std::mem::take(&mut self.failed);
        for id in &failed {
            self.states.remove(id);
        }
        failed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gives_up_after_sixth_failure() {
        let mut tracker = RetryTracker::new(RetryConfig::default());
        let decisions: Vec<RetryDecision> =
            (0..6).map(|_| tracker.record_failure("local-1", "offline")).collect();

        let secs = |s| RetryDecision::RetryAfter(Duration::from_secs(s));
        assert_eq!(
            decisions,
            vec![secs(1), secs(2), secs(4), secs(8), secs(16), RetryDecision::GiveUp]
        );
        assert!(tracker.is_failed("local-1"));
        assert_eq!(tracker.failed_count(), 1);
        assert_eq!(tracker.state("local-1").unwrap().failures, 6);
    }

    #[test]
    fn records_progress_independently() {
        let mut tracker = RetryTracker::new(RetryConfig::default());
        tracker.record_failure("a", "x");
        tracker.record_failure("a", "x");
        let decision = tracker.record_failure("b", "x");

        assert_eq!(decision, RetryDecision::RetryAfter(Duration::from_secs(1)));
        assert_eq!(tracker.state("a").unwrap().next_delay, Duration::from_secs(2));
    }

    #[test]
    fn clear_failed_resets_state() {
        let mut tracker = RetryTracker::new(RetryConfig::new(0));
        assert_eq!(tracker.record_failure("a", "x"), RetryDecision::GiveUp);
        assert_eq!(tracker.failed_ids(), vec!["a".to_string()]);

        assert_eq!(tracker.clear_failed(), 1);
        assert!(!tracker.is_failed("a"));
        assert!(tracker.state("a").is_none());
    }

    #[test]
    fn clear_forgets_one_record() {
        let mut tracker = RetryTracker::new(RetryConfig::new(0));
        tracker.record_failure("a", "x");
        tracker.record_failure("b", "x");
        tracker.clear("a");
        assert_eq!(tracker.failed_count(), 1);
        assert!(tracker.is_failed("b"));
    }
}
