//! Observable sync and network status.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

/// Snapshot of the sync engine's state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// A sync is in flight.
    pub is_syncing: bool,
    /// When the last sync completed successfully.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Unsynced records in local storage.
    pub pending_count: usize,
    /// Records that stopped retrying automatically.
    pub failed_count: usize,
    /// Error of the last failed sync, cleared on success.
    pub last_error: Option<String>,
}

/// Shared online/offline flag.
///
/// Clones observe and update the same flag. The sync engine syncs
/// immediately when it flips to online.
#[derive(Debug, Clone)]
pub struct NetworkStatus {
    online: Arc<watch::Sender<bool>>,
}

impl NetworkStatus {
    /// Creates a flag with the given initial state.
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self {
            online: Arc::new(tx),
        }
    }

    /// Creates a flag that starts online.
    pub fn online() -> Self {
        Self::new(true)
    }

    /// Creates a flag that starts offline.
    pub fn offline() -> Self {
        Self::new(false)
    }

    /// Updates the flag. Subscribers are only woken on a change.
    pub fn set_online(&self, online: bool) {
        self.online.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
    }

    /// Returns the current state.
    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self::online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn only_changes_wake_subscribers() {
        let network = NetworkStatus::offline();
        let mut rx = network.subscribe();

        network.set_online(false);
        assert!(!rx.has_changed().unwrap());

        network.clone().set_online(true);
        assert!(rx.has_changed().unwrap());
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        assert!(network.is_online());
    }
}
