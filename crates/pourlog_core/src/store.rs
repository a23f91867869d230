//! Local visit storage and the sync queue port.
//!
//! [`VisitStore`] is the device-local source of truth for visits. While the
//! device is offline it is the only copy, so implementations must be
//! crash-durable. [`KvVisitStore`] implements it on top of any
//! [`KeyValueStore`].

use crate::error::{CoreError, CoreResult};
use crate::types::Visit;
use pourlog_storage::KeyValueStore;
use std::sync::Arc;
use tracing::warn;

/// Key prefix under which [`KvVisitStore`] keeps visits.
pub const VISIT_KEY_PREFIX: &str = "visit/";

/// Durable local storage for visits.
pub trait VisitStore: Send + Sync {
    /// Inserts or replaces a visit by id.
    fn save(&self, visit: &Visit) -> CoreResult<()>;

    /// Returns every visit with `synced == false`, ordered by id.
    fn find_unsynced(&self) -> CoreResult<Vec<Visit>>;

    /// Returns the visit with the given id.
    fn find_by_id(&self, id: &str) -> CoreResult<Option<Visit>>;

    /// Deletes a visit. Returns `true` if it existed.
    fn delete(&self, id: &str) -> CoreResult<bool>;

    /// Returns the user's visits that are still active.
    fn find_active_visits(&self, user_id: &str) -> CoreResult<Vec<Visit>>;

    /// Returns the number of unsynced visits.
    fn count_unsynced(&self) -> CoreResult<usize> {
        Ok(self.find_unsynced()?.len())
    }
}

impl<T: VisitStore + ?Sized> VisitStore for Arc<T> {
    fn save(&self, visit: &Visit) -> CoreResult<()> {
        (**self).save(visit)
    }

    fn find_unsynced(&self) -> CoreResult<Vec<Visit>> {
        (**self).find_unsynced()
    }

    fn find_by_id(&self, id: &str) -> CoreResult<Option<Visit>> {
        (**self).find_by_id(id)
    }

    fn delete(&self, id: &str) -> CoreResult<bool> {
        (**self).delete(id)
    }

    fn find_active_visits(&self, user_id: &str) -> CoreResult<Vec<Visit>> {
        (**self).find_active_visits(user_id)
    }

    fn count_unsynced(&self) -> CoreResult<usize> {
        (**self).count_unsynced()
    }
}

/// Where the tracker hands visits for persistence and sync.
///
/// `queue_visit` must persist before returning: a visit whose queueing
/// failed is not considered tracked.
pub trait VisitQueue: Send + Sync {
    /// Durably records `visit` and schedules it for sync.
    fn queue_visit(&self, visit: &Visit) -> CoreResult<()>;

    /// Returns the user's locally stored active visits.
    fn active_visits(&self, user_id: &str) -> CoreResult<Vec<Visit>>;
}

impl<T: VisitQueue + ?Sized> VisitQueue for Arc<T> {
    fn queue_visit(&self, visit: &Visit) -> CoreResult<()> {
        (**self).queue_visit(visit)
    }

    fn active_visits(&self, user_id: &str) -> CoreResult<Vec<Visit>> {
        (**self).active_visits(user_id)
    }
}

/// A [`VisitStore`] that encodes visits as CBOR in a key-value store.
#[derive(Debug)]
pub struct KvVisitStore<S: KeyValueStore> {
    kv: S,
}

impl<S: KeyValueStore> KvVisitStore<S> {
    /// Wraps a key-value store.
    pub fn new(kv: S) -> Self {
        Self { kv }
    }

    /// Returns the underlying key-value store.
    pub fn inner(&self) -> &S {
        &self.kv
    }

    fn key(id: &str) -> String {
        format!("{VISIT_KEY_PREFIX}{id}")
    }

    fn decode(bytes: &[u8]) -> CoreResult<Visit> {
        ciborium::from_reader(bytes).map_err(CoreError::codec)
    }

    fn all(&self) -> CoreResult<Vec<Visit>> {
        let mut visits = Vec::new();
        for key in self.kv.keys_with_prefix(VISIT_KEY_PREFIX)? {
            let Some(bytes) = self.kv.get(&key)? else {
                continue;
            };
            match Self::decode(&bytes) {
                Ok(visit) => visits.push(visit),
                Err(e) => warn!(key = %key, error = %e, "skipping unreadable visit record"),
            }
        }
        Ok(visits)
    }
}

impl<S: KeyValueStore> VisitStore for KvVisitStore<S> {
    fn save(&self, visit: &Visit) -> CoreResult<()> {
        let mut bytes = Vec::new();
        ciborium::into_writer(visit, &mut bytes).map_err(CoreError::codec)?;
        self.kv.set(&Self::key(&visit.id), &bytes)?;
        Ok(())
    }

    fn find_unsynced(&self) -> CoreResult<Vec<Visit>> {
        Ok(self.all()?.into_iter().filter(|v| !v.synced).collect())
    }

    fn find_by_id(&self, id: &str) -> CoreResult<Option<Visit>> {
        self.kv
            .get(&Self::key(id))?
            .map(|bytes| Self::decode(&bytes))
            .transpose()
    }

    fn delete(&self, id: &str) -> CoreResult<bool> {
        Ok(self.kv.remove(&Self::key(id))?)
    }

    fn find_active_visits(&self, user_id: &str) -> CoreResult<Vec<Visit>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|v| v.is_active && v.user_id == user_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DetectionMethod;
    use chrono::{TimeZone, Utc};
    use pourlog_storage::{FileStore, InMemoryStore};
    use tempfile::tempdir;

    fn visit(user: &str, venue: &str) -> Visit {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 14, 30, 0).unwrap();
        Visit::begin(user, venue, t, DetectionMethod::Auto, t)
    }

    #[test]
    fn save_and_find() {
        let store = KvVisitStore::new(InMemoryStore::new());
        let v = visit("u-1", "v-1");
        store.save(&v).unwrap();

        assert_eq!(store.find_by_id(&v.id).unwrap(), Some(v.clone()));
        assert_eq!(store.find_unsynced().unwrap(), vec![v]);
        assert_eq!(store.count_unsynced().unwrap(), 1);
    }

    #[test]
    fn synced_visits_are_not_unsynced() {
        let store = KvVisitStore::new(InMemoryStore::new());
        let mut v = visit("u-1", "v-1");
        v.synced = true;
        store.save(&v).unwrap();
        assert!(store.find_unsynced().unwrap().is_empty());
    }

    #[test]
    fn delete_removes_visit() {
        let store = KvVisitStore::new(InMemoryStore::new());
        let v = visit("u-1", "v-1");
        store.save(&v).unwrap();
        assert!(store.delete(&v.id).unwrap());
        assert!(!store.delete(&v.id).unwrap());
        assert_eq!(store.find_by_id(&v.id).unwrap(), None);
    }

    #[test]
    fn active_visits_filter_by_user() {
        let store = KvVisitStore::new(InMemoryStore::new());
        let mine = visit("u-1", "v-1");
        let theirs = visit("u-2", "v-1");
        let mut ended = visit("u-1", "v-2");
        ended.complete(ended.arrival_time, ended.arrival_time);

        for v in [&mine, &theirs, &ended] {
            store.save(v).unwrap();
        }

        assert_eq!(store.find_active_visits("u-1").unwrap(), vec![mine]);
    }

    #[test]
    fn visits_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("visits.log");
        let v = visit("u-1", "v-1");

        {
            let store = KvVisitStore::new(FileStore::open(&path).unwrap());
            store.save(&v).unwrap();
        }

        let store = KvVisitStore::new(FileStore::open(&path).unwrap());
        assert_eq!(store.find_unsynced().unwrap(), vec![v]);
    }

    #[test]
    fn unreadable_records_are_skipped() {
        let kv = Arc::new(InMemoryStore::new());
        let store = KvVisitStore::new(Arc::clone(&kv));
        let v = visit("u-1", "v-1");
        store.save(&v).unwrap();
        kv.set("visit/garbage", b"\xff\x00not cbor").unwrap();

        assert_eq!(store.find_unsynced().unwrap(), vec![v.clone()]);
        assert_eq!(store.count_unsynced().unwrap(), 1);
        assert_eq!(store.find_active_visits("u-1").unwrap(), vec![v]);
        assert!(store.find_by_id("garbage").is_err());
    }
}
