//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A log entry could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The store file is corrupted beyond the recoverable tail.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the store open.
    #[error("store is locked by another process: {0}")]
    Locked(String),

    /// The store has been closed or was never writable.
    #[error("storage is closed")]
    Closed,
}
