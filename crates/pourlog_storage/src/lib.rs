//! # pourlog storage
//!
//! Durable key-value persistence for pourlog.
//!
//! This crate provides the lowest-level persistence port used by the rest of
//! the workspace. Stores are **opaque byte maps** - they do not interpret
//! the values they hold.
//!
//! ## Design Principles
//!
//! - Stores are simple key-value maps (get, set, remove, prefix scan)
//! - No knowledge of visits, geofences or sync state
//! - Must be `Send + Sync` so components can share one store
//! - A successful `set` is durable before it returns
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral sessions
//! - [`FileStore`] - Crash-durable append-only log on the local file system
//!
//! ## Example
//!
//! ```rust
//! use pourlog_storage::{InMemoryStore, KeyValueStore};
//!
//! let store = InMemoryStore::new();
//! store.set("greeting", b"hello world").unwrap();
//! assert_eq!(store.get("greeting").unwrap().as_deref(), Some(&b"hello world"[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::KeyValueStore;
pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
