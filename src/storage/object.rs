//! Contracts for user objects and the factories that create them.
//!
//! The engine never looks inside a stored object. It creates objects through
//! an [`ObjectFactory`], calls the [`CachedObject`] callbacks while holding the
//! entry's own lock, and asks `can_delete` to decide when an entry goes away.
//! Requests and responses are opaque [`Bytes`]; encoding them is somebody
//! else's job.

use crate::config::ConfigSnapshot;
use crate::error::{CacheError, ObjectError};
use crate::storage::key::Key;
use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A user object stored under one key.
pub trait CachedObject: Send + Sync + 'static {
    /// Implementation tag used by class upgrades.
    fn class_name(&self) -> &str;

    fn write_only(&mut self, request: &Bytes) -> Result<(), ObjectError>;

    fn read_only(&self, request: &Bytes) -> Result<Option<Bytes>, ObjectError>;

    /// Periodic maintenance. `memory_level` is the headroom left, 0–100:
    /// lower values ask for more aggressive eviction.
    fn do_maintenance(&mut self, now_ms: u64, memory_level: u8) -> Result<(), ObjectError>;

    fn can_delete(&self) -> bool;

    /// Asks the object to flush itself at `flush_at_ms`.
    fn flush(&mut self, now_ms: u64, flush_at_ms: u64);

    /// Approximate size in bytes.
    fn size(&self) -> u64;

    /// Absorbs the state of an object being replaced by a class upgrade.
    fn upgrade_from(&mut self, old: &dyn CachedObject) -> Result<(), ObjectError>;

    fn update_configuration(&mut self, _snapshot: &ConfigSnapshot) {}

    fn as_any(&self) -> &dyn Any;
}

impl fmt::Debug for dyn CachedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedObject")
            .field("class", &self.class_name())
            .field("size", &self.size())
            .finish()
    }
}

/// Creates user objects for one class.
pub trait ObjectFactory: Send + Sync {
    /// Class tag of the objects this factory produces.
    fn class_name(&self) -> &str;

    /// Creates an object, or `None` when the factory has nothing to offer.
    fn create_object(&self) -> Result<Option<Box<dyn CachedObject>>, ObjectError>;

    /// Creates an object for a specific key.
    fn create_object_for(&self, _key: &Key) -> Result<Box<dyn CachedObject>, ObjectError> {
        self.create_object()?.ok_or_else(|| {
            ObjectError::Failed(format!("factory {} produced no object", self.class_name()))
        })
    }

    fn update_configuration(&self, _snapshot: &ConfigSnapshot) {}

    fn close(&self) {}
}

/// A resolved factory together with the registry name it was resolved from.
///
/// Turns factory failures into [`CacheError::Creation`] and closes the
/// factory when dropped.
pub struct FactoryWrapper {
    name: String,
    factory: Arc<dyn ObjectFactory>,
}

impl fmt::Debug for FactoryWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryWrapper")
            .field("name", &self.name)
            .field("class", &self.factory.class_name())
            .finish()
    }
}

impl FactoryWrapper {
    pub fn new(name: impl Into<String>, factory: Arc<dyn ObjectFactory>) -> Self {
        Self {
            name: name.into(),
            factory,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class_name(&self) -> &str {
        self.factory.class_name()
    }

    pub fn create(&self, key: &Key) -> Result<Box<dyn CachedObject>, CacheError> {
        self.factory
            .create_object_for(key)
            .map_err(|e| CacheError::Creation {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn update_configuration(&self, snapshot: &ConfigSnapshot) {
        self.factory.update_configuration(snapshot);
    }
}

impl Drop for FactoryWrapper {
    fn drop(&mut self) {
        debug!(factory = %self.name, "Closing object factory");
        self.factory.close();
    }
}
