//! The sync engine.
//!
//! [`SyncEngine`] is a cheap-to-clone handle. Queueing a visit persists it
//! synchronously; pushing happens in [`SyncEngine::perform_sync`], invoked
//! either directly or by the driver task started with [`SyncEngine::spawn`].
//!
//! The driver owns every timer:
//!
//! | Trigger  | Fires                                           |
//! |----------|-------------------------------------------------|
//! | debounce | `debounce` after the last queue mutation         |
//! | periodic | every `sync_interval`                           |
//! | online   | when [`NetworkStatus`] flips to online          |
//! | retry    | after the shortest pending backoff delay        |

use crate::config::SyncConfig;
use crate::dedup::{deduplicate, natural_key, Deduplicated};
use crate::error::{SyncError, SyncResult};
use crate::retry::{RetryDecision, RetryTracker};
use crate::status::{NetworkStatus, SyncStatus};
use crate::transport::{BatchSyncRequest, ServerVisit, VisitPayload, VisitTransport};
use parking_lot::Mutex;
use pourlog_core::{Clock, CoreResult, SessionProvider, Visit, VisitQueue, VisitStore};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Result of a sync that reached the server, or found nothing to send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Records pushed and marked synced.
    pub pushed: usize,
    /// Older local revisions deleted because a newer one was pushed.
    pub superseded: usize,
}

#[derive(Debug)]
enum Command {
    Schedule,
    RetryAfter(Duration),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Debounce,
    Periodic,
    Online,
    Retry,
}

struct Driver {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

struct Inner<S, T> {
    config: SyncConfig,
    store: S,
    transport: T,
    session: Arc<dyn SessionProvider>,
    network: NetworkStatus,
    clock: Arc<dyn Clock>,
    retries: Mutex<RetryTracker>,
    in_flight: AtomicBool,
    status: watch::Sender<SyncStatus>,
    driver: Mutex<Option<Driver>>,
}

/// Clears the in-flight flag when dropped.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Durable visit queue with batched, deduplicated push to the server.
pub struct SyncEngine<S: VisitStore + 'static, T: VisitTransport> {
    inner: Arc<Inner<S, T>>,
}

impl<S: VisitStore + 'static, T: VisitTransport> Clone for SyncEngine<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: VisitStore + 'static, T: VisitTransport> SyncEngine<S, T> {
    /// Creates an engine. No timers run until [`Self::spawn`].
    pub fn new(
        config: SyncConfig,
        store: S,
        transport: T,
        session: Arc<dyn SessionProvider>,
        network: NetworkStatus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let pending_count = store.count_unsynced().unwrap_or_else(|e| {
            warn!(error = %e, "could not count unsynced visits");
            0
        });
        let (status, _) = watch::channel(SyncStatus {
            pending_count,
            ..SyncStatus::default()
        });

        Self {
            inner: Arc::new(Inner {
                retries: Mutex::new(RetryTracker::new(config.retry.clone())),
                config,
                store,
                transport,
                session,
                network,
                clock,
                in_flight: AtomicBool::new(false),
                status,
                driver: Mutex::new(None),
            }),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Returns the local store.
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Returns the network flag the engine observes.
    pub fn network(&self) -> &NetworkStatus {
        &self.inner.network
    }

    /// Returns the current status.
    pub fn status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    /// Subscribes to status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    /// Returns `true` if local storage holds an unsynced visit.
    ///
    /// # Errors
    ///
    /// Returns an error if local storage cannot be read.
    pub fn needs_sync(&self) -> SyncResult<bool> {
        Ok(self.inner.store.count_unsynced()? > 0)
    }

    /// Pushes every eligible unsynced visit as one batch.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AlreadySyncing`], [`SyncError::Offline`] or
    /// [`SyncError::Unauthenticated`] without contacting the server when a
    /// precondition fails. Any error from the push itself has already been
    /// recorded in the status and the affected records' retry state.
    pub async fn perform_sync(&self) -> SyncResult<SyncReport> {
        self.inner.perform_sync().await
    }

    /// Syncs immediately, bypassing the debounce window.
    ///
    /// # Errors
    ///
    /// Same as [`Self::perform_sync`].
    pub async fn force_sync_now(&self) -> SyncResult<SyncReport> {
        info!("forced sync requested");
        self.inner.perform_sync().await
    }

    /// Resets records that stopped retrying so the next sync includes them.
    /// Returns how many were reset.
    pub fn clear_failed_retries(&self) -> usize {
        let cleared = self.inner.retries.lock().clear_failed();
        info!(cleared, "cleared failed retries");
        self.inner.publish_counts();
        cleared
    }

    /// Returns the ids of records that stopped retrying.
    pub fn failed_ids(&self) -> Vec<String> {
        self.inner.retries.lock().failed_ids()
    }

    /// Starts the driver task on the current runtime.
    ///
    /// Schedules a debounced sync right away if anything is pending from a
    /// previous run. Calling this while a driver is running does nothing.
    pub fn spawn(&self) {
        let mut driver = self.inner.driver.lock();
        if driver.is_some() {
            warn!("sync driver already running");
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        match self.needs_sync() {
            Ok(true) => {
                let _ = tx.send(Command::Schedule);
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "could not check for pending visits"),
        }

        let task = tokio::spawn(drive(
            Arc::downgrade(&self.inner),
            rx,
            self.inner.network.subscribe(),
            self.inner.config.clone(),
        ));
        *driver = Some(Driver { commands: tx, task });
        debug!("sync driver started");
    }

    /// Stops the driver task and waits for it to exit.
    ///
    /// Queued visits stay in local storage and are picked up by the next
    /// driver.
    pub async fn shutdown(&self) {
        let driver = self.inner.driver.lock().take();
        let Some(driver) = driver else {
            return;
        };
        let _ = driver.commands.send(Command::Shutdown);
        if let Err(e) = driver.task.await {
            warn!(error = %e, "sync driver ended abnormally");
        }
    }
}

impl<S: VisitStore + 'static, T: VisitTransport> VisitQueue for SyncEngine<S, T> {
    fn queue_visit(&self, visit: &Visit) -> CoreResult<()> {
        self.inner.store.save(visit)?;
        self.inner.retries.lock().clear(&visit.id);
        debug!(visit_id = %visit.id, active = visit.is_active, "visit queued for sync");

        self.inner.publish_counts();
        self.inner.send(Command::Schedule);
        Ok(())
    }

    /// Active visits, minus any whose completed revision is still queued
    /// under a different id.
    fn active_visits(&self, user_id: &str) -> CoreResult<Vec<Visit>> {
        let active = self.inner.store.find_active_visits(user_id)?;
        let completed: HashSet<_> = self
            .inner
            .store
            .find_unsynced()?
            .iter()
            .filter(|v| !v.is_active)
            .map(natural_key)
            .collect();
        Ok(active
            .into_iter()
            .filter(|v| !completed.contains(&natural_key(v)))
            .collect())
    }
}

impl<S: VisitStore + 'static, T: VisitTransport> Inner<S, T> {
    fn send(&self, command: Command) {
        match self.driver.lock().as_ref() {
            Some(driver) => {
                let _ = driver.commands.send(command);
            }
            None => debug!(?command, "no sync driver running"),
        }
    }

    fn publish_counts(&self) {
        let failed_count = self.retries.lock().failed_count();
        match self.store.count_unsynced() {
            Ok(pending_count) => self.status.send_modify(|s| {
                s.pending_count = pending_count;
                s.failed_count = failed_count;
            }),
            Err(e) => {
                warn!(error = %e, "could not count unsynced visits");
                self.status.send_modify(|s| s.failed_count = failed_count);
            }
        }
    }

    fn check_preconditions(&self) -> SyncResult<()> {
        if !self.network.is_online() {
            return Err(SyncError::Offline);
        }
        if !self.session.current_session().is_authenticated() {
            return Err(SyncError::Unauthenticated);
        }
        Ok(())
    }

    async fn perform_sync(&self) -> SyncResult<SyncReport> {
        if let Err(e) = self.check_preconditions() {
            debug!(reason = %e, "sync skipped");
            return Err(e);
        }
        let Some(_in_flight) = InFlight::acquire(&self.in_flight) else {
            debug!("sync skipped, another sync in flight");
            return Err(SyncError::AlreadySyncing);
        };

        self.status.send_modify(|s| s.is_syncing = true);
        let result = self.push_unsynced().await;

        self.publish_counts();
        let now = self.clock.now();
        self.status.send_modify(|s| {
            s.is_syncing = false;
            match &result {
                Ok(_) => {
                    s.last_sync_time = Some(now);
                    s.last_error = None;
                }
                Err(e) => s.last_error = Some(e.to_string()),
            }
        });
        result
    }

    async fn push_unsynced(&self) -> SyncResult<SyncReport> {
        let unsynced = self.store.find_unsynced()?;
        let eligible: Vec<Visit> = {
            let retries = self.retries.lock();
            unsynced
                .into_iter()
                .filter(|v| !retries.is_failed(&v.id))
                .collect()
        };
        if eligible.is_empty() {
            debug!("nothing to sync");
            return Ok(SyncReport::default());
        }

        let deduped = deduplicate(eligible);
        let request = BatchSyncRequest {
            visits: deduped
                .batch
                .iter()
                .map(|v| VisitPayload::from_visit(v, self.config.timestamp_granularity))
                .collect(),
        };
        info!(
            records = request.visits.len(),
            superseded = deduped.superseded.len(),
            "pushing visit batch"
        );

        let stored = match self.transport.batch_sync(&request).await {
            Ok(stored) if stored.len() == request.visits.len() => stored,
            Ok(stored) => {
                let err = SyncError::Protocol(format!(
                    "sent {} visits, server returned {}",
                    request.visits.len(),
                    stored.len()
                ));
                self.record_failure(&deduped, &err);
                return Err(err);
            }
            Err(err) => {
                self.record_failure(&deduped, &err);
                return Err(err);
            }
        };

        self.reconcile(&deduped, stored)
    }

    /// Replaces each pushed record with its server-id twin and drops
    /// superseded revisions.
    fn reconcile(&self, deduped: &Deduplicated, stored: Vec<ServerVisit>) -> SyncResult<SyncReport> {
        let mut report = SyncReport::default();

        for (local, server) in deduped.batch.iter().zip(stored) {
            let synced = Visit {
                id: server.id,
                synced: true,
                ..local.clone()
            };
            let id_changed = synced.id != local.id;

            if self.changed_since_read(local)? {
                // A newer revision was queued mid-flight; it stays unsynced
                debug!(visit_id = %local.id, "newer revision queued during sync, keeping it");
                if id_changed {
                    self.store.save(&synced)?;
                }
            } else {
                self.store.save(&synced)?;
                if id_changed {
                    self.store.delete(&local.id)?;
                }
            }
            self.retries.lock().clear(&local.id);
            debug!(local_id = %local.id, server_id = %synced.id, "visit synced");
            report.pushed += 1;
        }

        for loser in &deduped.superseded {
            if !self.changed_since_read(loser)? {
                self.store.delete(&loser.id)?;
                report.superseded += 1;
            }
            self.retries.lock().clear(&loser.id);
        }

        info!(pushed = report.pushed, superseded = report.superseded, "sync complete");
        Ok(report)
    }

    /// Compares whole records: two revisions may share an `updated_at`.
    fn changed_since_read(&self, visit: &Visit) -> SyncResult<bool> {
        Ok(self
            .store
            .find_by_id(&visit.id)?
            .is_some_and(|current| current != *visit))
    }

    fn record_failure(&self, deduped: &Deduplicated, err: &SyncError) {
        let message = err.to_string();
        let mut next_retry: Option<Duration> = None;
        {
            let mut retries = self.retries.lock();
            for visit in deduped.batch.iter().chain(&deduped.superseded) {
                match retries.record_failure(&visit.id, &message) {
                    RetryDecision::RetryAfter(delay) => {
                        next_retry = Some(next_retry.map_or(delay, |d| d.min(delay)));
                    }
                    RetryDecision::GiveUp => {
                        error!(visit_id = %visit.id, error = %message, "giving up on visit after repeated sync failures");
                    }
                }
            }
        }

        if err.is_retryable() {
            warn!(error = %message, "batch sync failed");
        } else {
            error!(error = %message, "batch sync failed");
        }

        if let Some(delay) = next_retry {
            debug!(delay_ms = delay.as_millis() as u64, "retry scheduled");
            self.send(Command::RetryAfter(delay));
        }
    }
}

async fn drive<S: VisitStore + 'static, T: VisitTransport>(
    inner: Weak<Inner<S, T>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut online: watch::Receiver<bool>,
    config: SyncConfig,
) {
    let mut ticker =
        tokio::time::interval_at(Instant::now() + config.sync_interval, config.sync_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut debounce_at: Option<Instant> = None;
    let mut retry_at: Option<Instant> = None;

    loop {
        let trigger = tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Schedule) => {
                    debounce_at = Some(Instant::now() + config.debounce);
                    continue;
                }
                Some(Command::RetryAfter(delay)) => {
                    let at = Instant::now() + delay;
                    retry_at = Some(retry_at.map_or(at, |current| current.min(at)));
                    continue;
                }
                Some(Command::Shutdown) | None => break,
            },
            () = sleep_until(debounce_at.unwrap_or_else(Instant::now)), if debounce_at.is_some() => {
                debounce_at = None;
                Trigger::Debounce
            }
            () = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                retry_at = None;
                Trigger::Retry
            }
            _ = ticker.tick() => Trigger::Periodic,
            Ok(()) = online.changed() => {
                if !*online.borrow_and_update() {
                    debug!("network went offline");
                    continue;
                }
                Trigger::Online
            }
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };
        debug!(?trigger, "sync triggered");
        if let Err(e) = inner.perform_sync().await {
            debug!(?trigger, error = %e, "triggered sync did not complete");
        }
    }
    debug!("sync driver stopped");
}
