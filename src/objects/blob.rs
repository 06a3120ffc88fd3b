//! Byte values with optional expiry.

use crate::config::ConfigSnapshot;
use crate::error::ObjectError;
use crate::objects::counter::CounterObject;
use crate::objects::BLOB_CLASS;
use crate::storage::{now_ms, CachedObject, ObjectFactory};
use bytes::Bytes;
use std::any::Any;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Time-to-live applied on every write, in milliseconds (0 = never expires).
pub const BLOB_TTL_MS: &str = "blob.ttl.ms";

/// Memory level below which a maintenance pass evicts blobs (0 = never).
pub const BLOB_EVICT_LEVEL: &str = "blob.evict.level";

/// Represents a stored value with optional expiry time.
#[derive(Debug, Clone, Default)]
pub struct BlobObject {
    value: Bytes,
    /// Applied on every write
    ttl_ms: Option<u64>,
    /// When this value expires, wall-clock ms (None = never expires)
    expires_at: Option<u64>,
    evict_level: u8,
    /// Latest time handed in by maintenance or flush
    observed_ms: u64,
    cleared: bool,
}

impl BlobObject {
    pub fn new(ttl_ms: Option<u64>) -> Self {
        Self {
            ttl_ms: ttl_ms.filter(|&ttl| ttl > 0),
            ..Self::default()
        }
    }

    pub fn with_evict_level(mut self, level: u8) -> Self {
        self.evict_level = level.min(100);
        self
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn expires_at(&self) -> Option<u64> {
        self.expires_at
    }

    /// Checks if this value has expired at `now_ms`.
    #[inline]
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_ms)
    }

    fn observe(&mut self, now_ms: u64) {
        self.observed_ms = self.observed_ms.max(now_ms);
    }

    fn clear(&mut self) {
        self.value = Bytes::new();
        self.cleared = true;
    }
}

impl CachedObject for BlobObject {
    fn class_name(&self) -> &str {
        BLOB_CLASS
    }

    fn write_only(&mut self, request: &Bytes) -> Result<(), ObjectError> {
        if request.is_empty() {
            self.clear();
            return Ok(());
        }
        self.value = request.clone();
        self.cleared = false;
        self.expires_at = self.ttl_ms.map(|ttl| now_ms().saturating_add(ttl));
        Ok(())
    }

    fn read_only(&self, _request: &Bytes) -> Result<Option<Bytes>, ObjectError> {
        if self.cleared || self.is_expired_at(now_ms()) {
            return Ok(None);
        }
        Ok(Some(self.value.clone()))
    }

    fn do_maintenance(&mut self, now_ms: u64, memory_level: u8) -> Result<(), ObjectError> {
        self.observe(now_ms);
        if memory_level < self.evict_level {
            self.clear();
        }
        Ok(())
    }

    fn can_delete(&self) -> bool {
        self.cleared || self.is_expired_at(self.observed_ms)
    }

    fn flush(&mut self, now_ms: u64, flush_at_ms: u64) {
        self.observe(now_ms);
        if flush_at_ms <= now_ms {
            self.clear();
        } else {
            self.expires_at = Some(self.expires_at.map_or(flush_at_ms, |at| at.min(flush_at_ms)));
        }
    }

    fn size(&self) -> u64 {
        self.value.len() as u64 + 16
    }

    fn upgrade_from(&mut self, old: &dyn CachedObject) -> Result<(), ObjectError> {
        if let Some(blob) = old.as_any().downcast_ref::<BlobObject>() {
            self.value = blob.value.clone();
            self.expires_at = blob.expires_at;
            self.observed_ms = blob.observed_ms;
            self.cleared = blob.cleared;
            return Ok(());
        }
        if let Some(counter) = old.as_any().downcast_ref::<CounterObject>() {
            self.value = Bytes::from(counter.value().to_string());
            self.cleared = false;
            return Ok(());
        }
        Err(ObjectError::Unsupported(format!(
            "cannot upgrade {} to {}",
            old.class_name(),
            BLOB_CLASS
        )))
    }

    fn update_configuration(&mut self, snapshot: &ConfigSnapshot) {
        if let Ok(Some(ttl)) = snapshot.get_u64(BLOB_TTL_MS) {
            self.ttl_ms = (ttl > 0).then_some(ttl);
        }
        if let Ok(Some(level)) = snapshot.get_u64(BLOB_EVICT_LEVEL) {
            self.evict_level = level.min(100) as u8;
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Creates [`BlobObject`]s with the configured TTL and eviction level.
#[derive(Debug, Default)]
pub struct BlobFactory {
    /// 0 = no TTL
    ttl_ms: AtomicU64,
    evict_level: AtomicU8,
}

impl BlobFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Result<Self, ObjectError> {
        let factory = Self::new();
        factory.apply(snapshot)?;
        Ok(factory)
    }

    fn apply(&self, snapshot: &ConfigSnapshot) -> Result<(), ObjectError> {
        let invalid = |e: crate::error::ConfigError| ObjectError::InvalidValue(e.to_string());

        if let Some(ttl) = snapshot.get_u64(BLOB_TTL_MS).map_err(invalid)? {
            self.ttl_ms.store(ttl, Ordering::Relaxed);
        }
        if let Some(level) = snapshot.get_u64(BLOB_EVICT_LEVEL).map_err(invalid)? {
            self.evict_level
                .store(level.min(100) as u8, Ordering::Relaxed);
        }
        Ok(())
    }
}

impl ObjectFactory for BlobFactory {
    fn class_name(&self) -> &str {
        BLOB_CLASS
    }

    fn create_object(&self) -> Result<Option<Box<dyn CachedObject>>, ObjectError> {
        let ttl = self.ttl_ms.load(Ordering::Relaxed);
        let object = BlobObject::new(Some(ttl))
            .with_evict_level(self.evict_level.load(Ordering::Relaxed));
        Ok(Some(Box::new(object)))
    }

    fn update_configuration(&self, snapshot: &ConfigSnapshot) {
        if let Err(e) = self.apply(snapshot) {
            tracing::warn!(error = %e, "Ignoring invalid blob configuration");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(value: &'static str) -> BlobObject {
        let mut blob = BlobObject::new(None);
        blob.write_only(&Bytes::from(value)).unwrap();
        blob
    }

    #[test]
    fn test_write_and_read() {
        let blob = blob("hello");
        assert_eq!(
            blob.read_only(&Bytes::new()).unwrap(),
            Some(Bytes::from("hello"))
        );
        assert!(!blob.can_delete());
        assert_eq!(blob.size(), 5 + 16);
    }

    #[test]
    fn test_empty_write_clears() {
        let mut blob = blob("hello");
        blob.write_only(&Bytes::new()).unwrap();
        assert_eq!(blob.read_only(&Bytes::new()).unwrap(), None);
        assert!(blob.can_delete());
    }

    #[test]
    fn test_ttl_expiry_is_seen_by_maintenance() {
        let mut blob = BlobObject::new(Some(1_000));
        blob.write_only(&Bytes::from("v")).unwrap();
        let expires_at = blob.expires_at().unwrap();

        blob.do_maintenance(expires_at - 1, 100).unwrap();
        assert!(!blob.can_delete());

        blob.do_maintenance(expires_at, 100).unwrap();
        assert!(blob.can_delete());
    }

    #[test]
    fn test_flush_in_past_clears() {
        let mut blob = blob("v");
        blob.flush(100, 50);
        assert!(blob.can_delete());
    }

    #[test]
    fn test_flush_in_future_sets_expiry() {
        let mut blob = blob("v");
        blob.flush(100, 500);
        assert_eq!(blob.expires_at(), Some(500));
        assert!(!blob.can_delete());

        blob.do_maintenance(500, 100).unwrap();
        assert!(blob.can_delete());
    }

    #[test]
    fn test_eviction_by_memory_level() {
        let mut blob = blob("v").with_evict_level(50);
        blob.do_maintenance(1, 60).unwrap();
        assert!(!blob.can_delete());
        blob.do_maintenance(2, 40).unwrap();
        assert!(blob.can_delete());
    }

    #[test]
    fn test_update_configuration() {
        let mut blob = blob("v");
        blob.update_configuration(&ConfigSnapshot::new().with(BLOB_EVICT_LEVEL, 80));
        blob.do_maintenance(1, 70).unwrap();
        assert!(blob.can_delete());
    }

    #[test]
    fn test_upgrade_from_counter() {
        let mut counter = CounterObject::new();
        counter.write_only(&Bytes::from("-12")).unwrap();

        let mut blob = BlobObject::new(None);
        blob.upgrade_from(&counter).unwrap();
        assert_eq!(blob.value(), &Bytes::from("-12"));
    }

    #[test]
    fn test_factory_reads_snapshot() {
        let factory = BlobFactory::from_snapshot(
            &ConfigSnapshot::new()
                .with(BLOB_TTL_MS, 5_000)
                .with(BLOB_EVICT_LEVEL, 30),
        )
        .unwrap();

        let mut object = factory.create_object().unwrap().unwrap();
        object.write_only(&Bytes::from("v")).unwrap();
        let blob = object.as_any().downcast_ref::<BlobObject>().unwrap();
        assert!(blob.expires_at().is_some());
        assert_eq!(blob.evict_level, 30);
    }

    #[test]
    fn test_factory_rejects_bad_snapshot() {
        let result = BlobFactory::from_snapshot(&ConfigSnapshot::new().with(BLOB_TTL_MS, "soon"));
        assert!(matches!(result, Err(ObjectError::InvalidValue(_))));
    }
}
