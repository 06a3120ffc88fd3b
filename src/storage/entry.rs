//! Stored entries: a key, its user object, and a lock scoped to that object.

use crate::config::ConfigSnapshot;
use crate::error::ObjectError;
use crate::storage::key::Key;
use crate::storage::object::CachedObject;
use crate::sync::{LockConfig, ShardLock, ShardReadGuard, ShardWriteGuard};
use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// One key and its user object.
///
/// The object lock is independent of the bin's map lock. The only nesting
/// the engine performs is bin map lock, then entry lock (maintenance, flush,
/// upgrade); a request thread never holds a map lock while it runs a
/// callback.
pub struct Entry {
    key: Key,
    object: ShardLock<Box<dyn CachedObject>>,
    /// Set once the entry has left its bin for good. Writers that raced the
    /// removal see it after taking the object lock and start over.
    removed: AtomicBool,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("key", &self.key)
            .field("removed", &self.is_removed())
            .finish()
    }
}

impl Entry {
    pub fn new(key: Key, object: Box<dyn CachedObject>, lock: LockConfig) -> Self {
        Self {
            key,
            object: ShardLock::new(object, lock),
            removed: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Shared access to the object.
    pub fn read(&self) -> ShardReadGuard<'_, Box<dyn CachedObject>> {
        self.object.read()
    }

    /// Exclusive access to the object.
    pub fn write(&self) -> ShardWriteGuard<'_, Box<dyn CachedObject>> {
        self.object.write()
    }

    pub fn can_delete(&self) -> bool {
        self.object.read().can_delete()
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
    }

    /// Detaches the object, leaving an inert placeholder behind, and marks
    /// the entry removed.
    pub(crate) fn vacate(&self) -> Box<dyn CachedObject> {
        let mut object = self.object.write();
        self.mark_removed();
        std::mem::replace(&mut *object, Box::new(Vacated))
    }
}

/// Placeholder left in an entry whose object was handed elsewhere.
struct Vacated;

impl CachedObject for Vacated {
    fn class_name(&self) -> &str {
        "vacated"
    }

    fn write_only(&mut self, _request: &Bytes) -> Result<(), ObjectError> {
        Err(ObjectError::Failed("entry was transmitted".to_string()))
    }

    fn read_only(&self, _request: &Bytes) -> Result<Option<Bytes>, ObjectError> {
        Ok(None)
    }

    fn do_maintenance(&mut self, _now_ms: u64, _memory_level: u8) -> Result<(), ObjectError> {
        Ok(())
    }

    fn can_delete(&self) -> bool {
        true
    }

    fn flush(&mut self, _now_ms: u64, _flush_at_ms: u64) {}

    fn size(&self) -> u64 {
        0
    }

    fn upgrade_from(&mut self, _old: &dyn CachedObject) -> Result<(), ObjectError> {
        Err(ObjectError::Unsupported("upgrade of a vacated entry".to_string()))
    }

    fn update_configuration(&mut self, _snapshot: &ConfigSnapshot) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}
