//! Notification hook.

/// Receives user-facing visit notifications.
///
/// Calls are fire-and-forget: an error is logged by the caller and never
/// affects visit state. Implementations must return promptly.
pub trait NotificationHook: Send + Sync {
    /// A visit was detected at a venue.
    fn notify_visit_detected(&self, venue_name: &str, venue_id: &str) -> Result<(), String>;

    /// A visit ended.
    fn notify_visit_ended(
        &self,
        venue_name: &str,
        duration_minutes: i64,
        visit_id: &str,
    ) -> Result<(), String>;
}

/// A hook that discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl NotificationHook for NoopNotifier {
    fn notify_visit_detected(&self, _venue_name: &str, _venue_id: &str) -> Result<(), String> {
        Ok(())
    }

    fn notify_visit_ended(
        &self,
        _venue_name: &str,
        _duration_minutes: i64,
        _visit_id: &str,
    ) -> Result<(), String> {
        Ok(())
    }
}
