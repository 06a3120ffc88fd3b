//! Signed integer counters.
//!
//! A write request is a decimal delta; the response to a read is the current
//! value in decimal. A counter that returns to zero is deleted.

use crate::error::ObjectError;
use crate::objects::blob::BlobObject;
use crate::objects::COUNTER_CLASS;
use crate::storage::{now_ms, CachedObject, ObjectFactory};
use bytes::Bytes;
use std::any::Any;

const NOT_AN_INTEGER: &str = "value is not an integer or out of range";

#[derive(Debug, Clone, Default)]
pub struct CounterObject {
    value: i64,
    flush_at: Option<u64>,
    observed_ms: u64,
}

impl CounterObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    /// Adds `delta`, failing on overflow.
    pub fn incr_by(&mut self, delta: i64) -> Result<i64, ObjectError> {
        self.value = self
            .value
            .checked_add(delta)
            .ok_or_else(|| ObjectError::InvalidValue("increment would overflow".to_string()))?;
        Ok(self.value)
    }
}

fn parse_integer(bytes: &[u8]) -> Result<i64, ObjectError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| ObjectError::InvalidValue(NOT_AN_INTEGER.to_string()))
}

impl CachedObject for CounterObject {
    fn class_name(&self) -> &str {
        COUNTER_CLASS
    }

    fn write_only(&mut self, request: &Bytes) -> Result<(), ObjectError> {
        let delta = parse_integer(request)?;
        self.incr_by(delta)?;
        Ok(())
    }

    fn read_only(&self, _request: &Bytes) -> Result<Option<Bytes>, ObjectError> {
        if self.flush_at.is_some_and(|at| at <= now_ms()) {
            return Ok(None);
        }
        Ok(Some(Bytes::from(self.value.to_string())))
    }

    fn do_maintenance(&mut self, now_ms: u64, _memory_level: u8) -> Result<(), ObjectError> {
        self.observed_ms = self.observed_ms.max(now_ms);
        Ok(())
    }

    fn can_delete(&self) -> bool {
        self.value == 0 || self.flush_at.is_some_and(|at| at <= self.observed_ms)
    }

    fn flush(&mut self, now_ms: u64, flush_at_ms: u64) {
        self.observed_ms = self.observed_ms.max(now_ms);
        self.flush_at = Some(self.flush_at.map_or(flush_at_ms, |at| at.min(flush_at_ms)));
    }

    fn size(&self) -> u64 {
        std::mem::size_of::<Self>() as u64
    }

    fn upgrade_from(&mut self, old: &dyn CachedObject) -> Result<(), ObjectError> {
        if let Some(counter) = old.as_any().downcast_ref::<CounterObject>() {
            self.value = counter.value;
            self.flush_at = counter.flush_at;
            return Ok(());
        }
        if let Some(blob) = old.as_any().downcast_ref::<BlobObject>() {
            self.value = parse_integer(blob.value())?;
            self.flush_at = blob.expires_at();
            return Ok(());
        }
        Err(ObjectError::Unsupported(format!(
            "cannot upgrade {} to {}",
            old.class_name(),
            COUNTER_CLASS
        )))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Default)]
pub struct CounterFactory;

impl CounterFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ObjectFactory for CounterFactory {
    fn class_name(&self) -> &str {
        COUNTER_CLASS
    }

    fn create_object(&self) -> Result<Option<Box<dyn CachedObject>>, ObjectError> {
        Ok(Some(Box::new(CounterObject::new())))
    }
}
