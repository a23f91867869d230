//! Error types for visit detection.

use crate::position::Permission;
use pourlog_storage::StorageError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while detecting and tracking visits.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Location permission has not been granted.
    #[error("location permission not granted (current: {0:?})")]
    PermissionDenied(Permission),

    /// The venue is not known to the component.
    #[error("unknown venue: {0}")]
    UnknownVenue(String),

    /// No authenticated user is signed in.
    #[error("no authenticated user")]
    Unauthenticated,

    /// Durable storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A persisted record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The position source failed.
    #[error("position source error: {0}")]
    Position(String),

    /// The visit could not be handed to the sync queue.
    #[error("queue error: {0}")]
    Queue(String),
}

impl CoreError {
    /// Creates a codec error from any displayable cause.
    pub fn codec(err: impl std::fmt::Display) -> Self {
        Self::Codec(err.to_string())
    }
}
