//! Error types for the sync engine.

use pourlog_core::CoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server response did not match the request.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server rejected the request.
    #[error("server error: {0}")]
    ServerError(String),

    /// Local storage error during sync.
    #[error("local store error: {0}")]
    Core(#[from] CoreError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(String),

    /// The network is offline.
    #[error("network offline")]
    Offline,

    /// No authenticated user, or the server refused the credentials.
    #[error("not authenticated")]
    Unauthenticated,

    /// Another sync is in flight.
    #[error("sync already in progress")]
    AlreadySyncing,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::ServerError(_) | SyncError::Offline | SyncError::AlreadySyncing => true,
            _ => false,
        }
    }
}
