//! Position source port.
//!
//! The geofence engine never talks to a platform location API directly. It
//! consumes a [`PositionSource`], which can be backed by any provider that
//! can report permissions, deliver one-shot reads, and stream updates.

use crate::error::{CoreError, CoreResult};
use crate::types::Position;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Location permission state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Permission granted.
    Granted,
    /// Permission refused.
    Denied,
    /// The platform will prompt on the next request.
    Prompt,
    /// The user has never been asked.
    NotDetermined,
}

impl Permission {
    /// Returns `true` if positions may be read.
    pub fn is_granted(self) -> bool {
        self == Permission::Granted
    }
}

/// Options passed to [`PositionSource::watch_position`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// Ask for the most accurate fix available.
    pub high_accuracy: bool,
    /// Accept cached fixes up to this age.
    pub maximum_age: Duration,
    /// Give up on a single fix after this long.
    pub timeout: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            maximum_age: Duration::ZERO,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Identifies an active position watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchHandle(pub u64);

/// Channel end a position source pushes watched samples into.
pub type PositionSink = UnboundedSender<Position>;

/// A capability-based source of position samples.
pub trait PositionSource: Send + Sync + 'static {
    /// Asks the user for location permission.
    fn request_permissions(&self) -> impl Future<Output = CoreResult<Permission>> + Send;

    /// Returns the current permission without prompting.
    fn check_permissions(&self) -> impl Future<Output = CoreResult<Permission>> + Send;

    /// Reads a single position, or `None` if no fix is available.
    fn current_position(&self) -> impl Future<Output = CoreResult<Option<Position>>> + Send;

    /// Starts streaming samples into `sink` until [`Self::clear_watch`].
    fn watch_position(&self, options: WatchOptions, sink: PositionSink) -> CoreResult<WatchHandle>;

    /// Stops a watch started by [`Self::watch_position`].
    fn clear_watch(&self, handle: WatchHandle);
}

/// A scriptable position source for testing.
///
/// Samples pushed with [`MockPositionSource::push`] are delivered to every
/// active watch. [`MockPositionSource::set_current`] controls one-shot reads.
#[derive(Debug)]
pub struct MockPositionSource {
    permission: Mutex<Permission>,
    grant_on_request: Mutex<bool>,
    current: Mutex<Option<Position>>,
    watches: Mutex<HashMap<u64, PositionSink>>,
    next_handle: AtomicU64,
    fail_reads: Mutex<bool>,
}

impl MockPositionSource {
    /// Creates a source with permission already granted.
    pub fn new() -> Self {
        Self::with_permission(Permission::Granted)
    }

    /// Creates a source in the given permission state.
    pub fn with_permission(permission: Permission) -> Self {
        Self {
            permission: Mutex::new(permission),
            grant_on_request: Mutex::new(true),
            current: Mutex::new(None),
            watches: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            fail_reads: Mutex::new(false),
        }
    }

    /// Sets the permission state.
    pub fn set_permission(&self, permission: Permission) {
        *self.permission.lock() = permission;
    }

    /// Controls whether `request_permissions` grants or denies.
    pub fn set_grant_on_request(&self, grant: bool) {
        *self.grant_on_request.lock() = grant;
    }

    /// Sets the position returned by one-shot reads.
    pub fn set_current(&self, position: Option<Position>) {
        *self.current.lock() = position;
    }

    /// Makes one-shot reads fail.
    pub fn set_fail_reads(&self, fail: bool) {
        *self.fail_reads.lock() = fail;
    }

    /// Delivers a sample to every active watch.
    pub fn push(&self, position: Position) {
        self.watches
            .lock()
            .retain(|_, sink| sink.send(position).is_ok());
    }

    /// Returns the number of active watches.
    pub fn active_watches(&self) -> usize {
        self.watches.lock().len()
    }
}

impl Default for MockPositionSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionSource for MockPositionSource {
    async fn request_permissions(&self) -> CoreResult<Permission> {
        let granted = *self.grant_on_request.lock();
        let permission = if granted {
            Permission::Granted
        } else {
            Permission::Denied
        };
        *self.permission.lock() = permission;
        Ok(permission)
    }

    async fn check_permissions(&self) -> CoreResult<Permission> {
        Ok(*self.permission.lock())
    }

    async fn current_position(&self) -> CoreResult<Option<Position>> {
        if *self.fail_reads.lock() {
            return Err(CoreError::Position("mock read failure".into()));
        }
        Ok(*self.current.lock())
    }

    fn watch_position(&self, _options: WatchOptions, sink: PositionSink) -> CoreResult<WatchHandle> {
        let permission = *self.permission.lock();
        if !permission.is_granted() {
            return Err(CoreError::PermissionDenied(permission));
        }
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.watches.lock().insert(id, sink);
        Ok(WatchHandle(id))
    }

    fn clear_watch(&self, handle: WatchHandle) {
        self.watches.lock().remove(&handle.0);
    }
}
