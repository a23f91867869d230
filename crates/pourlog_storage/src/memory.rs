//! In-memory key-value store for testing.

use crate::backend::KeyValueStore;
use crate::error::StorageResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory key-value store.
///
/// This store keeps everything in a `BTreeMap` and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Anonymous sessions that never need persistence
///
/// Nothing survives the process.
///
/// # Example
///
/// ```rust
/// use pourlog_storage::{InMemoryStore, KeyValueStore};
///
/// let store = InMemoryStore::new();
/// store.set("visit/1", b"{}").unwrap();
/// assert_eq!(store.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn flush(&self) -> StorageResult<()> {
        // Nothing buffered
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let store = InMemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn memory_set_then_get() {
        let store = InMemoryStore::new();
        store.set("a", b"hello").unwrap();
        assert_eq!(store.get("a").unwrap().unwrap(), b"hello");

        store.set("a", b"world").unwrap();
        assert_eq!(store.get("a").unwrap().unwrap(), b"world");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn memory_remove_reports_presence() {
        let store = InMemoryStore::new();
        store.set("a", b"x").unwrap();
        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn memory_prefix_scan_is_ordered_and_bounded() {
        let store = InMemoryStore::new();
        store.set("visit/b", b"2").unwrap();
        store.set("visit/a", b"1").unwrap();
        store.set("geofence/x", b"3").unwrap();
        store.set("visits", b"4").unwrap();

        let keys = store.keys_with_prefix("visit/").unwrap();
        assert_eq!(keys, vec!["visit/a".to_string(), "visit/b".to_string()]);
    }

    #[test]
    fn memory_clear() {
        let store = InMemoryStore::new();
        store.set("a", b"x").unwrap();
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn memory_shared_through_arc() {
        let store = std::sync::Arc::new(InMemoryStore::new());
        let other = std::sync::Arc::clone(&store);
        other.set("k", b"v").unwrap();
        assert_eq!(KeyValueStore::get(&store, "k").unwrap().unwrap(), b"v");
    }
}
