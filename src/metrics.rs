//! Metrics sink consumed by the engine.
//!
//! The engine reports events through [`MetricsSink`] and never reads them
//! back; no engine state depends on these counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Events the engine reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricEvent {
    Hit,
    Miss,
    Create,
    Remove,
    Expire,
    Flush,
    MaintenanceFailure,
}

pub trait MetricsSink: Send + Sync {
    fn record(&self, event: MetricEvent, count: u64);

    fn snapshot(&self) -> MetricsSnapshot;
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub creates: u64,
    pub removes: u64,
    pub expires: u64,
    pub flushes: u64,
    pub maintenance_failures: u64,
}

/// Relaxed atomic counters.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    creates: AtomicU64,
    removes: AtomicU64,
    expires: AtomicU64,
    flushes: AtomicU64,
    maintenance_failures: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, event: MetricEvent) -> &AtomicU64 {
        match event {
            MetricEvent::Hit => &self.hits,
            MetricEvent::Miss => &self.misses,
            MetricEvent::Create => &self.creates,
            MetricEvent::Remove => &self.removes,
            MetricEvent::Expire => &self.expires,
            MetricEvent::Flush => &self.flushes,
            MetricEvent::MaintenanceFailure => &self.maintenance_failures,
        }
    }
}

impl MetricsSink for CacheMetrics {
    #[inline]
    fn record(&self, event: MetricEvent, count: u64) {
        if count > 0 {
            self.counter(event).fetch_add(count, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            creates: self.creates.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            expires: self.expires.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            maintenance_failures: self.maintenance_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let metrics = CacheMetrics::new();
        metrics.record(MetricEvent::Hit, 3);
        metrics.record(MetricEvent::Miss, 1);
        metrics.record(MetricEvent::Expire, 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.hits, 3);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.expires, 0);
    }
}
