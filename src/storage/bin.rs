//! Bins: the leaf unit of concurrency.
//!
//! A bin is one `HashMap<Key, Arc<Entry>>` behind one [`ShardLock`]. The lock
//! guards the map only; each entry's object has its own lock, which the bin
//! takes (map lock first, entry lock second) only for maintenance, flush and
//! class upgrades.

use crate::error::{CacheError, Result};
use crate::storage::entry::Entry;
use crate::storage::key::Key;
use crate::storage::maintenance::{MaintenanceReport, MaintenanceRequest};
use crate::storage::object::{CachedObject, FactoryWrapper};
use crate::sync::{LockConfig, ShardLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Outcome of inserting a freshly created entry.
pub(crate) enum Insertion {
    /// The candidate is now stored.
    Inserted(Arc<Entry>),
    /// Another thread won the race; the candidate was not stored.
    Occupied {
        winner: Arc<Entry>,
        rejected: Arc<Entry>,
    },
    /// The shard counts changed while the candidate was being built; the
    /// caller must route the key again.
    Rerouted(Arc<Entry>),
}

pub struct Bin {
    map: ShardLock<HashMap<Key, Arc<Entry>>>,
    lock: LockConfig,
}

impl std::fmt::Debug for Bin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bin").field("len", &self.len()).finish()
    }
}

impl Bin {
    pub fn new(lock: LockConfig) -> Self {
        Self {
            map: ShardLock::new(HashMap::new(), lock),
            lock,
        }
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<Key> {
        self.map.read().keys().cloned().collect()
    }

    /// Looks up an entry under the read lock.
    pub fn get(&self, key: &Key) -> Option<Arc<Entry>> {
        self.map.read().get(key).cloned()
    }

    /// Returns the entry for `key`, creating it on a miss.
    ///
    /// The factory runs outside any lock. If another thread inserts the key
    /// while the factory runs, the new object is dropped and the winner is
    /// returned, so the factory may run more than once per key under races
    /// but at most one entry ever exists.
    pub fn get_or_create<F>(&self, key: &Key, factory: F) -> Result<Arc<Entry>>
    where
        F: FnOnce(&Key) -> Result<Box<dyn CachedObject>>,
    {
        if let Some(entry) = self.get(key) {
            return Ok(entry);
        }

        let candidate = Arc::new(Entry::new(key.clone(), factory(key)?, self.lock));

        let mut map = self.map.write();
        Ok(Arc::clone(map.entry(key.clone()).or_insert(candidate)))
    }

    /// Inserts `candidate` unless its key is already present or
    /// `still_routed` says the key no longer belongs here.
    pub(crate) fn insert_routed(
        &self,
        candidate: Arc<Entry>,
        still_routed: &dyn Fn() -> bool,
    ) -> Insertion {
        let mut map = self.map.write();

        if let Some(winner) = map.get(candidate.key()) {
            return Insertion::Occupied {
                winner: Arc::clone(winner),
                rejected: candidate,
            };
        }
        if !still_routed() {
            return Insertion::Rerouted(candidate);
        }

        map.insert(candidate.key().clone(), Arc::clone(&candidate));
        Insertion::Inserted(candidate)
    }

    /// Removes `key`.
    pub fn delete(&self, key: &Key) -> Option<Arc<Entry>> {
        let removed = self.map.write().remove(key);
        if let Some(entry) = &removed {
            entry.mark_removed();
        }
        removed
    }

    /// Removes `key` if `predicate` accepts the stored entry.
    pub(crate) fn remove_if(
        &self,
        key: &Key,
        predicate: impl FnOnce(&Arc<Entry>) -> bool,
    ) -> Option<Arc<Entry>> {
        let mut map = self.map.write();
        if !map.get(key).is_some_and(predicate) {
            return None;
        }
        let removed = map.remove(key);
        if let Some(entry) = &removed {
            entry.mark_removed();
        }
        removed
    }

    /// Inserts an entry moved here by a resize. No eviction accounting.
    pub fn move_entry_into(&self, entry: Arc<Entry>) {
        let mut map = self.map.write();
        let displaced = map.insert(entry.key().clone(), entry);
        debug_assert!(displaced.is_none(), "resize moved a key onto itself");
    }

    /// Moves every entry for which `destination` names another bin into that
    /// bin, holding this bin's write lock for the whole walk. Entries whose
    /// destination is `None` (or this bin) stay put.
    ///
    /// Returns the number of entries moved.
    pub(crate) fn relocate(&self, mut destination: impl FnMut(&Key) -> Option<Arc<Bin>>) -> usize {
        let mut moved = 0;
        let mut map = self.map.write();

        map.retain(|key, entry| match destination(key) {
            Some(target) if !std::ptr::eq(Arc::as_ptr(&target), self) => {
                target.move_entry_into(Arc::clone(entry));
                moved += 1;
                false
            }
            _ => true,
        });

        moved
    }

    /// Removes and returns every entry.
    pub(crate) fn drain(&self) -> Vec<Arc<Entry>> {
        let mut map = self.map.write();
        map.drain().map(|(_, entry)| entry).collect()
    }

    /// Removes every entry immediately. Returns the number removed.
    pub fn flush_now(&self) -> usize {
        let mut map = self.map.write();
        let removed = map.len();
        for entry in map.values() {
            entry.mark_removed();
        }
        map.clear();
        removed
    }

    /// Asks every object to flush itself at a deadline spread uniformly over
    /// `[window_start_ms, window_start_ms + window_ms)` by its position in the
    /// bin, then drops the objects that are already deletable.
    ///
    /// Returns the number of entries removed now.
    pub fn flush_spread(&self, now_ms: u64, window_start_ms: u64, window_ms: u64) -> usize {
        let mut map = self.map.write();
        let count = map.len() as u64;
        let mut position = 0u64;
        let mut removed = 0;

        map.retain(|_, entry| {
            let deadline = window_start_ms + window_ms * position / count;
            position += 1;

            let mut object = entry.write();
            object.flush(now_ms, deadline);
            if object.can_delete() {
                entry.mark_removed();
                removed += 1;
                false
            } else {
                true
            }
        });

        removed
    }

    /// Runs one maintenance pass over every entry, accumulating into `report`.
    ///
    /// A failing object is logged and kept.
    pub fn do_maintenance(&self, request: &MaintenanceRequest, report: &mut MaintenanceReport) {
        let mut map = self.map.write();

        map.retain(|key, entry| {
            let mut object = entry.write();

            if let Some(snapshot) = &request.configuration {
                object.update_configuration(snapshot);
            }

            if let Err(e) = object.do_maintenance(request.now_ms, request.memory_level) {
                warn!(key = %key, class = object.class_name(), error = %e, "Object maintenance failed, keeping entry");
                report.failures += 1;
                report.kept += 1;
                report.total_size += object.size();
                return true;
            }

            if object.can_delete() {
                entry.mark_removed();
                report.removed += 1;
                false
            } else {
                report.kept += 1;
                report.total_size += object.size();
                true
            }
        });
    }

    /// Replaces every object of class `old_class` with one built by `factory`
    /// that has absorbed the old object's state.
    ///
    /// Stops at the first failure; objects already upgraded stay upgraded and
    /// objects of other classes are never touched.
    pub fn upgrade_class(&self, old_class: &str, factory: &FactoryWrapper) -> Result<usize> {
        let map = self.map.write();
        let mut upgraded = 0;

        for (key, entry) in map.iter() {
            let mut object = entry.write();
            if object.class_name() != old_class {
                continue;
            }

            let mut replacement = factory.create(key).map_err(|e| CacheError::Upgrade {
                class: old_class.to_string(),
                reason: e.to_string(),
            })?;
            replacement
                .upgrade_from(&**object)
                .map_err(|e| CacheError::Upgrade {
                    class: old_class.to_string(),
                    reason: format!("{}: {}", key, e),
                })?;

            *object = replacement;
            upgraded += 1;
        }

        Ok(upgraded)
    }
}
