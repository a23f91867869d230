//! # pourlog sync engine
//!
//! Offline-first sync of visit records for pourlog.
//!
//! This crate provides:
//! - A durable visit queue that persists before returning
//! - Deduplication of locally queued revisions
//! - Batched push to a remote endpoint with server-id reconciliation
//! - Per-record retry with exponential backoff
//! - Debounced, periodic, on-reconnect and forced sync triggers
//! - An HTTP transport abstraction and in-memory test transports
//!
//! ## Architecture
//!
//! ```text
//! VisitTracker ──queue_visit──► SyncEngine ──save──► VisitStore
//!                                   │
//!                                   └──batch_sync──► VisitTransport
//! ```
//!
//! ## Key Invariants
//!
//! - A queued visit is durable before `queue_visit` returns
//! - No batch is sent while offline or without an authenticated user
//! - At most one sync is in flight
//! - A batch succeeds or fails as a whole
//! - Local records are only deleted after their replacement is saved

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dedup;
mod engine;
mod error;
mod http;
mod retry;
mod status;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use dedup::{deduplicate, natural_key, Deduplicated, NaturalKey};
pub use engine::{SyncEngine, SyncReport};
pub use error::{SyncError, SyncResult};
pub use http::{
    HttpClient, HttpRequest, HttpResponse, HttpTransport, LoopbackClient, LoopbackServer,
    BATCH_SYNC_PATH,
};
pub use retry::{RetryDecision, RetryState, RetryTracker};
pub use status::{NetworkStatus, SyncStatus};
pub use transport::{
    BatchSyncRequest, BatchSyncResponse, InMemoryVisitServer, MockTransport, ServerVisit,
    VisitPayload, VisitTransport,
};
