//! In-order event distribution.
//!
//! Components publish their output events on an [`EventFeed`]. Every
//! subscriber receives every event emitted after it subscribed, exactly once
//! and in emission order. There is no replay: late subscribers miss earlier
//! events.

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// A multi-subscriber, in-order event feed.
///
/// The feed:
/// - Preserves emission order per subscriber
/// - Drops subscribers whose receiver has been closed
/// - Never blocks the emitter
#[derive(Debug)]
pub struct EventFeed<T> {
    subscribers: Mutex<Vec<UnboundedSender<T>>>,
}

impl<T: Clone + Send> EventFeed<T> {
    /// Creates a feed with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Sends `event` to every live subscriber.
    pub fn emit(&self, event: T) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of live subscribers as of the last emit.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<T: Clone + Send> Default for EventFeed<T> {
    fn default() -> Self {
        Self::new()
    }
}
