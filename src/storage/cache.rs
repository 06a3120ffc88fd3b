//! The cache: an array of buckets, and the entry point for every request.
//!
//! ## Bucket multiplication
//!
//! ```text
//!   before:  bucket_count = 4
//!            [ b0 ][ b1 ][ b2 ][ b3 ]
//!
//!   multiply_bucket_count(3)
//!            [ b0 ][ b1 ][ b2 ][ b3 ][ b4 ] ... [ b11 ]
//!              │                       ▲            ▲
//!              └──── h % 12 ∈ {0, 4, 8} ┘────────────┘
//! ```
//!
//! The new count is always a multiple of the old one, so a key that lived in
//! bucket `i` lands in `i + m * old_count` for some `m`. Requests keep flowing
//! during the move: lookups check the previous-count bucket before the
//! current-count bucket, exactly as a bucket does for its bins.
//!
//! ## Modes
//!
//! A cache starts in `Configuration`, passes through `InitialLoad` while its
//! buckets are built, and then sits in `Nominal`. Flush, upgrade, resharding,
//! maintenance, transmit and receive each take the cache out of `Nominal` for
//! their duration; only one of them runs at a time. Reads and writes are never
//! gated.

use crate::config::{CacheConfig, ConfigHub, ConfigSnapshot, BUCKET_COUNT};
use crate::error::{CacheError, Result};
use crate::metrics::{MetricEvent, MetricsSink, MetricsSnapshot};
use crate::objects::BLOB_CLASS;
use crate::registry::Registry;
use crate::storage::bucket::{Bucket, ResizePacing, Slot};
use crate::storage::entry::Entry;
use crate::storage::key::Key;
use crate::storage::maintenance::{
    now_ms, spread_windows, MaintenanceReport, MaintenanceRequest,
};
use crate::storage::memory::{MemoryMonitor, SizeBudgetMonitor};
use crate::storage::object::{CachedObject, FactoryWrapper};
use crate::storage::scheduler::next_prime;
use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a cache is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CacheMode {
    Configuration = 0,
    InitialLoad = 1,
    Nominal = 2,
    Maintenance = 3,
    Eviction = 4,
    Flush = 5,
    Resize = 6,
    Transmit = 7,
    Receive = 8,
}

impl CacheMode {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => CacheMode::Configuration,
            1 => CacheMode::InitialLoad,
            3 => CacheMode::Maintenance,
            4 => CacheMode::Eviction,
            5 => CacheMode::Flush,
            6 => CacheMode::Resize,
            7 => CacheMode::Transmit,
            8 => CacheMode::Receive,
            _ => CacheMode::Nominal,
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheMode::Configuration => "configuration",
            CacheMode::InitialLoad => "initial-load",
            CacheMode::Nominal => "nominal",
            CacheMode::Maintenance => "maintenance",
            CacheMode::Eviction => "eviction",
            CacheMode::Flush => "flush",
            CacheMode::Resize => "resize",
            CacheMode::Transmit => "transmit",
            CacheMode::Receive => "receive",
        };
        f.write_str(name)
    }
}

/// Admits one non-nominal operation at a time.
struct ModeGate {
    current: AtomicU8,
    busy: Mutex<()>,
}

impl ModeGate {
    fn new(mode: CacheMode) -> Self {
        Self {
            current: AtomicU8::new(mode as u8),
            busy: Mutex::new(()),
        }
    }

    fn current(&self) -> CacheMode {
        CacheMode::from_u8(self.current.load(Ordering::Acquire))
    }

    fn set(&self, mode: CacheMode) {
        self.current.store(mode as u8, Ordering::Release);
    }

    /// Waits for the gate, then switches to `mode`.
    fn enter(&self, mode: CacheMode) -> ModeGuard<'_> {
        let held = self.busy.lock();
        self.set(mode);
        ModeGuard { gate: self, _held: held }
    }

    fn try_enter(&self, mode: CacheMode) -> Option<ModeGuard<'_>> {
        let held = self.busy.try_lock()?;
        self.set(mode);
        Some(ModeGuard { gate: self, _held: held })
    }
}

/// Returns the cache to `Nominal` when dropped.
struct ModeGuard<'a> {
    gate: &'a ModeGate,
    _held: MutexGuard<'a, ()>,
}

impl ModeGuard<'_> {
    fn switch(&self, mode: CacheMode) {
        self.gate.set(mode);
    }
}

impl Drop for ModeGuard<'_> {
    fn drop(&mut self) {
        self.gate.set(CacheMode::Nominal);
    }
}

/// Point-in-time view of a cache.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub name: String,
    pub mode: CacheMode,
    pub bucket_count: usize,
    pub bin_count: usize,
    pub item_count: usize,
    pub last_maintenance: Option<MaintenanceReport>,
    pub metrics: MetricsSnapshot,
}

/// Builds a [`Cache`], walking it through `Configuration` and `InitialLoad`.
pub struct CacheBuilder {
    name: String,
    registry: Option<Arc<Registry>>,
    factory: String,
    snapshot: ConfigSnapshot,
    monitor: Option<Arc<dyn MemoryMonitor>>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl CacheBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: None,
            factory: BLOB_CLASS.to_string(),
            snapshot: ConfigSnapshot::new(),
            monitor: None,
            metrics: None,
        }
    }

    /// Registry to resolve factories from. Defaults to the bundled classes.
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Registry name of the factory that creates objects on a write miss.
    pub fn factory(mut self, name: impl Into<String>) -> Self {
        self.factory = name.into();
        self
    }

    pub fn config(mut self, snapshot: ConfigSnapshot) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Defaults to a [`SizeBudgetMonitor`] over `size.max`.
    pub fn memory_monitor(mut self, monitor: Arc<dyn MemoryMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Defaults to the registry's sink for this cache name.
    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<Cache> {
        let gate = ModeGate::new(CacheMode::Configuration);

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(Registry::with_bundled()));
        let config = CacheConfig::from_snapshot(&self.snapshot)?;
        let factory = registry.create_factory(&self.factory, &self.snapshot)?;
        let metrics: Arc<dyn MetricsSink> = match self.metrics {
            Some(metrics) => metrics,
            None => registry.metrics_for(&self.name) as Arc<dyn MetricsSink>,
        };
        let monitor: Arc<dyn MemoryMonitor> = match self.monitor {
            Some(monitor) => monitor,
            None => Arc::new(SizeBudgetMonitor::new(config.size_max)) as Arc<dyn MemoryMonitor>,
        };

        gate.set(CacheMode::InitialLoad);
        let buckets: Vec<Arc<Bucket>> = (0..config.bucket_count)
            .map(|_| Arc::new(Bucket::new(config.bin_count_min, config.lock)))
            .collect();

        info!(
            cache = %self.name,
            buckets = config.bucket_count,
            bins_per_bucket = config.bin_count_min,
            factory = %factory.name(),
            lock = %config.lock.kind,
            "Cache ready"
        );

        let cache = Cache {
            name: self.name,
            bucket_count_current: AtomicUsize::new(buckets.len()),
            bucket_count_previous: AtomicUsize::new(0),
            buckets: RwLock::new(buckets),
            config: RwLock::new(config),
            snapshot: RwLock::new(self.snapshot),
            config_dirty: AtomicBool::new(false),
            factory: RwLock::new(Arc::new(factory)),
            registry,
            metrics,
            monitor,
            gate,
            last_report: Mutex::new(None),
        };
        cache.gate.set(CacheMode::Nominal);
        Ok(cache)
    }
}

pub struct Cache {
    name: String,
    buckets: RwLock<Vec<Arc<Bucket>>>,
    bucket_count_current: AtomicUsize,
    /// 0 when no multiplication is in flight
    bucket_count_previous: AtomicUsize,
    config: RwLock<CacheConfig>,
    snapshot: RwLock<ConfigSnapshot>,
    /// Set by `update_configuration`, consumed by the next maintenance pass
    config_dirty: AtomicBool,
    factory: RwLock<Arc<FactoryWrapper>>,
    registry: Arc<Registry>,
    metrics: Arc<dyn MetricsSink>,
    monitor: Arc<dyn MemoryMonitor>,
    gate: ModeGate,
    last_report: Mutex<Option<MaintenanceReport>>,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("mode", &self.mode())
            .field("bucket_count", &self.bucket_count())
            .field("items", &self.item_count())
            .finish()
    }
}

impl Cache {
    /// Builds a cache with the bundled classes and the given configuration.
    pub fn new(name: impl Into<String>, snapshot: ConfigSnapshot) -> Result<Self> {
        CacheBuilder::new(name).config(snapshot).build()
    }

    pub fn builder(name: impl Into<String>) -> CacheBuilder {
        CacheBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> CacheMode {
        self.gate.current()
    }

    pub fn config(&self) -> CacheConfig {
        self.config.read().clone()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Class of the objects created on a write miss.
    pub fn factory_class(&self) -> String {
        self.factory.read().class_name().to_string()
    }

    pub fn bucket_count(&self) -> usize {
        self.bucket_count_current.load(Ordering::SeqCst)
    }

    pub fn bucket(&self, index: usize) -> Option<Arc<Bucket>> {
        self.buckets.read().get(index).cloned()
    }

    pub fn item_count(&self) -> usize {
        self.snapshot_buckets().iter().map(|b| b.item_count()).sum()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn stats(&self) -> CacheStats {
        let buckets = self.snapshot_buckets();
        CacheStats {
            name: self.name.clone(),
            mode: self.mode(),
            bucket_count: self.bucket_count(),
            bin_count: buckets.iter().map(|b| b.bin_count()).sum(),
            item_count: buckets.iter().map(|b| b.item_count()).sum(),
            last_maintenance: *self.last_report.lock(),
            metrics: self.metrics.snapshot(),
        }
    }

    fn snapshot_buckets(&self) -> Vec<Arc<Bucket>> {
        self.buckets.read().clone()
    }

    #[inline]
    fn counts(&self) -> (usize, usize) {
        let current = self.bucket_count_current.load(Ordering::SeqCst);
        let previous = self.bucket_count_previous.load(Ordering::SeqCst);
        (current, previous)
    }

    fn pacing(&self, config: &CacheConfig) -> ResizePacing<'_> {
        ResizePacing::new(
            self.monitor.as_ref(),
            config.resize_pause_occupancy_pct,
            config.resize_pause,
        )
    }

    // ---------------------------------------------------------------------
    // Request path
    // ---------------------------------------------------------------------

    /// Looks up the entry for `key` without creating it.
    pub fn get(&self, key: &Key) -> Option<Arc<Entry>> {
        loop {
            let (current, previous) = self.counts();

            let mut found = None;
            if previous != 0 {
                found = self
                    .bucket(key.bucket_index(previous))
                    .and_then(|bucket| bucket.get(key));
            }
            if found.is_none() {
                found = self
                    .bucket(key.bucket_index(current))
                    .and_then(|bucket| bucket.get(key));
            }

            if found.is_some() || self.counts() == (current, previous) {
                return found;
            }
        }
    }

    /// Returns the entry for `key`, creating it through the cache's factory
    /// on a miss.
    pub fn get_entry(&self, key: &Key) -> Result<Arc<Entry>> {
        let factory = Arc::clone(&*self.factory.read());
        let lock = self.config.read().lock;
        let make = |key: &Key| -> Result<Arc<Entry>> {
            Ok(Arc::new(Entry::new(key.clone(), factory.create(key)?, lock)))
        };

        let mut candidate = None;
        let (entry, inserted) = self.find_or_insert(key, &mut candidate, &make)?;
        if inserted {
            self.metrics.record(MetricEvent::Create, 1);
        }
        Ok(entry)
    }

    /// Routes `key` through the bucket counts, inserting a new entry on a
    /// miss. Returns the entry and whether it was inserted by this call.
    fn find_or_insert(
        &self,
        key: &Key,
        candidate: &mut Option<Arc<Entry>>,
        make: &dyn Fn(&Key) -> Result<Arc<Entry>>,
    ) -> Result<(Arc<Entry>, bool)> {
        loop {
            let (current, previous) = self.counts();

            if previous != 0 {
                if let Some(entry) = self
                    .bucket(key.bucket_index(previous))
                    .and_then(|bucket| bucket.get(key))
                {
                    return Ok((entry, false));
                }
            }

            let Some(bucket) = self.bucket(key.bucket_index(current)) else {
                continue;
            };
            let routed = || self.bucket_count_current.load(Ordering::SeqCst) == current;

            match bucket.find_or_insert(key, candidate, make, &routed)? {
                Slot::Existing(entry) => return Ok((entry, false)),
                Slot::Inserted(entry) => return Ok((entry, true)),
                Slot::Rerouted => continue,
            }
        }
    }

    /// Runs the object's read callback under the entry's read lock.
    ///
    /// A miss returns `Ok(None)` and never creates an entry.
    pub fn read_only(&self, key: &Key, request: &Bytes) -> Result<Option<Bytes>> {
        let Some(entry) = self.get(key) else {
            self.metrics.record(MetricEvent::Miss, 1);
            return Ok(None);
        };
        self.metrics.record(MetricEvent::Hit, 1);

        let object = entry.read();
        Ok(object.read_only(request)?)
    }

    /// Runs the object's write callback under the entry's write lock,
    /// creating the entry on a miss. Removes the entry afterwards if the
    /// object reports itself deletable.
    pub fn write_only(&self, key: &Key, request: &Bytes) -> Result<()> {
        loop {
            let entry = self.get_entry(key)?;

            let (written, deletable) = {
                let mut object = entry.write();
                if entry.is_removed() {
                    // Lost a race with a removal; the key needs a fresh entry.
                    continue;
                }
                let written = object.write_only(request);
                (written, object.can_delete())
            };

            if deletable {
                let removed = self.remove_where(key, &|stored| {
                    Arc::ptr_eq(stored, &entry) && stored.can_delete()
                });
                if removed.is_some() {
                    self.metrics.record(MetricEvent::Remove, 1);
                }
            }
            return Ok(written?);
        }
    }

    /// Removes `key`. Returns true if an entry was removed.
    pub fn delete(&self, key: &Key) -> bool {
        let removed = self.remove_where(key, &|_| true).is_some();
        if removed {
            self.metrics.record(MetricEvent::Remove, 1);
        }
        removed
    }

    fn remove_where(
        &self,
        key: &Key,
        predicate: &dyn Fn(&Arc<Entry>) -> bool,
    ) -> Option<Arc<Entry>> {
        loop {
            let (current, previous) = self.counts();

            let from_previous = if previous != 0 {
                self.bucket(key.bucket_index(previous))
                    .and_then(|bucket| bucket.remove_where(key, predicate))
            } else {
                None
            };
            let from_current = self
                .bucket(key.bucket_index(current))
                .and_then(|bucket| bucket.remove_where(key, predicate));

            let removed = from_previous.or(from_current);
            if removed.is_some() || self.counts() == (current, previous) {
                return removed;
            }
        }
    }

    // ---------------------------------------------------------------------
    // Flush and upgrade
    // ---------------------------------------------------------------------

    /// Flushes every entry.
    ///
    /// `0` clears the cache immediately. Any other value asks each object to
    /// flush itself at a deadline inside the next `duration_ms`, spreading the
    /// deadlines so the aggregate removal rate is uniform over the window.
    /// Returns the number of entries removed right away.
    pub fn flush(&self, duration_ms: u64) -> usize {
        let _mode = self.gate.enter(CacheMode::Flush);
        let buckets = self.snapshot_buckets();

        let removed = if duration_ms == 0 {
            buckets.iter().map(|b| b.flush_now()).sum()
        } else {
            let now = now_ms();
            let counts: Vec<usize> = buckets.iter().map(|b| b.item_count()).collect();
            buckets
                .iter()
                .zip(spread_windows(&counts, now, duration_ms))
                .map(|(bucket, (start, window))| bucket.flush_spread(now, start, window))
                .sum()
        };

        self.metrics.record(MetricEvent::Flush, removed as u64);
        info!(cache = %self.name, duration_ms, removed, "Cache flushed");
        removed
    }

    /// Replaces every object of class `old_class` with one created by the
    /// factory registered as `factory_name`.
    pub fn upgrade_class(&self, old_class: &str, factory_name: &str) -> Result<usize> {
        let snapshot = self.snapshot.read().clone();
        let factory = self.registry.create_factory(factory_name, &snapshot)?;
        self.upgrade_class_with(old_class, factory)
    }

    /// Like [`Cache::upgrade_class`] with an already resolved factory.
    ///
    /// If the cache's own factory produced `old_class`, it is replaced too, so
    /// later write misses create upgraded objects.
    pub fn upgrade_class_with(&self, old_class: &str, factory: FactoryWrapper) -> Result<usize> {
        let _mode = self.gate.enter(CacheMode::Maintenance);

        let mut upgraded = 0;
        for bucket in self.snapshot_buckets() {
            upgraded += bucket.upgrade_class(old_class, &factory)?;
        }

        let replace_factory = self.factory.read().class_name() == old_class;
        if replace_factory {
            *self.factory.write() = Arc::new(factory);
        }

        info!(
            cache = %self.name,
            from = old_class,
            upgraded,
            replace_factory,
            "Object class upgraded"
        );
        Ok(upgraded)
    }

    // ---------------------------------------------------------------------
    // Resharding
    // ---------------------------------------------------------------------

    /// Multiplies the bucket count by `factor` (at least 2), moving every
    /// entry whose bucket changes. Returns the number of entries moved.
    pub fn multiply_bucket_count(&self, factor: usize) -> Result<usize> {
        if factor < 2 {
            return Err(CacheError::InvalidFactor(factor));
        }

        let _mode = self.gate.enter(CacheMode::Resize);
        let config = self.config();
        let old_count = self.bucket_count();
        let new_count = old_count
            .checked_mul(factor)
            .ok_or(CacheError::InvalidFactor(factor))?;

        info!(
            cache = %self.name,
            from = old_count,
            to = new_count,
            items = self.item_count(),
            "Multiplying bucket count"
        );

        self.bucket_count_previous
            .store(old_count, Ordering::SeqCst);
        self.buckets.write().extend(
            (old_count..new_count).map(|_| Arc::new(Bucket::new(config.bin_count_min, config.lock))),
        );
        self.bucket_count_current
            .store(new_count, Ordering::SeqCst);

        let buckets = self.snapshot_buckets();
        let pacing = self.pacing(&config);
        let moved: usize = buckets[..old_count]
            .iter()
            .enumerate()
            .map(|(index, bucket)| bucket.move_items(index, new_count, &buckets, &pacing))
            .sum();

        self.bucket_count_previous.store(0, Ordering::SeqCst);

        self.config.write().bucket_count = new_count;
        {
            let mut snapshot = self.snapshot.write();
            *snapshot = snapshot.with(BUCKET_COUNT, new_count);
        }

        info!(cache = %self.name, buckets = new_count, moved, "Bucket multiplication complete");
        Ok(moved)
    }

    /// Grows the bin count of every bucket whose items per bin exceed
    /// `bin.item.max`. The new count is the next prime at or above twice the
    /// items-per-bin target. Returns the number of buckets resized.
    pub fn resize_bins(&self) -> usize {
        let _mode = self.gate.enter(CacheMode::Resize);
        self.resize_bins_locked()
    }

    fn resize_bins_locked(&self) -> usize {
        let config = self.config();
        let pacing = self.pacing(&config);
        let mut resized = 0;

        for (index, bucket) in self.snapshot_buckets().iter().enumerate() {
            let items = bucket.item_count();
            let bins = bucket.bin_count();
            if items <= bins.saturating_mul(config.bin_item_max) {
                continue;
            }

            let target = next_prime((items * 2 / config.bin_item_max).max(config.bin_count_min));
            if target <= bins {
                continue;
            }

            match bucket.resize(target, &pacing) {
                Ok(moved) => {
                    resized += 1;
                    debug!(cache = %self.name, bucket = index, bins = target, moved, "Bucket bins resized");
                }
                Err(e) => {
                    warn!(cache = %self.name, bucket = index, error = %e, "Bucket resize failed");
                }
            }
        }

        resized
    }

    // ---------------------------------------------------------------------
    // Maintenance
    // ---------------------------------------------------------------------

    fn request(&self, now_ms: u64, memory_level: u8) -> MaintenanceRequest {
        let request = MaintenanceRequest::new(now_ms, memory_level);
        if self.config_dirty.swap(false, Ordering::AcqRel) {
            request.with_configuration(self.snapshot.read().clone())
        } else {
            request
        }
    }

    fn maintain(&self, request: &MaintenanceRequest) -> MaintenanceReport {
        let mut report = MaintenanceReport {
            passes: 1,
            ..MaintenanceReport::default()
        };
        for bucket in self.snapshot_buckets() {
            bucket.do_maintenance(request, &mut report);
        }
        report
    }

    fn record_report(&self, report: &MaintenanceReport) {
        self.metrics.record(MetricEvent::Expire, report.removed);
        self.metrics
            .record(MetricEvent::MaintenanceFailure, report.failures);
        self.monitor.observe_total_size(report.total_size);
        *self.last_report.lock() = Some(*report);
    }

    /// Runs one maintenance pass over every entry.
    ///
    /// Pending configuration changes are attached to the request if it does
    /// not carry one already.
    pub fn do_maintenance(&self, request: &MaintenanceRequest) -> MaintenanceReport {
        let _mode = self.gate.enter(CacheMode::Maintenance);

        let report = if request.configuration.is_none() {
            self.maintain(&self.request(request.now_ms, request.memory_level))
        } else {
            self.config_dirty.store(false, Ordering::Release);
            self.maintain(request)
        };

        self.record_report(&report);
        report
    }

    /// Runs maintenance passes at decreasing memory levels until the
    /// aggregate size fits `size.max` or a pass at level 0 has run.
    ///
    /// The returned report sums removals and failures over every pass and
    /// carries the kept count and size of the last one.
    pub fn evict(&self, now_ms: u64, memory_level: u8) -> MaintenanceReport {
        let _mode = self.gate.enter(CacheMode::Eviction);
        self.evict_locked(now_ms, memory_level)
    }

    fn evict_locked(&self, now_ms: u64, memory_level: u8) -> MaintenanceReport {
        let (size_max, step) = {
            let config = self.config.read();
            (config.size_max, config.eviction_level_step)
        };

        let mut level = memory_level.min(100);
        let mut removed = 0;
        let mut failures = 0;
        let mut passes = 0;

        let last = loop {
            let report = self.maintain(&self.request(now_ms, level));
            removed += report.removed;
            failures += report.failures;
            passes += 1;

            if size_max == 0 || report.total_size <= size_max || level == 0 {
                break report;
            }
            debug!(
                cache = %self.name,
                level,
                size = report.total_size,
                size_max,
                "Over size budget, evicting harder"
            );
            level = level.saturating_sub(step.max(1));
        };

        let report = MaintenanceReport {
            removed,
            failures,
            passes,
            ..last
        };
        if size_max != 0 && report.total_size > size_max {
            warn!(
                cache = %self.name,
                size = report.total_size,
                size_max,
                passes,
                "Cache still over size budget after eviction"
            );
        }

        self.record_report(&report);
        report
    }

    /// One scheduled cycle: an eviction pass followed by a bin resize check.
    ///
    /// Returns `None` without doing anything if another operation holds the
    /// cache out of `Nominal`.
    pub fn run_scheduled_pass(&self, now_ms: u64) -> Option<(MaintenanceReport, usize)> {
        let mode = self.gate.try_enter(CacheMode::Eviction)?;

        let memory_level = 100 - self.monitor.occupancy_percent().min(100);
        let report = self.evict_locked(now_ms, memory_level);

        mode.switch(CacheMode::Resize);
        let resized = self.resize_bins_locked();

        Some((report, resized))
    }

    // ---------------------------------------------------------------------
    // Configuration
    // ---------------------------------------------------------------------

    /// Applies a new configuration snapshot.
    ///
    /// The factory sees it immediately; objects see it during the next
    /// maintenance pass. The bucket count only changes through
    /// [`Cache::multiply_bucket_count`], so a different `bucket.count` is
    /// ignored here.
    pub fn update_configuration(&self, snapshot: ConfigSnapshot) -> Result<()> {
        let mut config = CacheConfig::from_snapshot(&snapshot)?;

        let bucket_count = self.bucket_count();
        if config.bucket_count != bucket_count {
            warn!(
                cache = %self.name,
                requested = config.bucket_count,
                current = bucket_count,
                "Ignoring bucket count change outside multiplication"
            );
            config.bucket_count = bucket_count;
        }

        self.factory.read().update_configuration(&snapshot);
        self.monitor.set_budget(config.size_max);
        *self.config.write() = config;
        *self.snapshot.write() = snapshot.with(BUCKET_COUNT, bucket_count);
        self.config_dirty.store(true, Ordering::Release);

        info!(cache = %self.name, keys = self.snapshot.read().len(), "Configuration updated");
        Ok(())
    }

    /// The configuration currently in force, as key/value pairs.
    pub fn configuration_map(&self) -> BTreeMap<String, String> {
        self.snapshot.read().to_map()
    }

    /// Applies every snapshot later published on `hub`.
    ///
    /// The subscription holds a weak reference; once the cache is dropped
    /// further publications are ignored.
    pub fn watch(self: &Arc<Self>, hub: &ConfigHub) {
        let cache = Arc::downgrade(self);
        hub.subscribe(move |snapshot| {
            if let Some(cache) = cache.upgrade() {
                if let Err(e) = cache.update_configuration(snapshot.clone()) {
                    warn!(cache = %cache.name, error = %e, "Rejected published configuration");
                }
            }
        });
    }

    // ---------------------------------------------------------------------
    // Transmit / receive
    // ---------------------------------------------------------------------

    /// Removes every entry held by a bucket whose index satisfies `predicate`
    /// and hands the objects out.
    pub fn transmit<P>(&self, predicate: P) -> Vec<(Key, Box<dyn CachedObject>)>
    where
        P: Fn(usize) -> bool,
    {
        let _mode = self.gate.enter(CacheMode::Transmit);

        let mut transmitted = Vec::new();
        for (index, bucket) in self.snapshot_buckets().iter().enumerate() {
            if !predicate(index) {
                continue;
            }
            for entry in bucket.drain() {
                transmitted.push((entry.key().clone(), entry.vacate()));
            }
        }

        self.metrics
            .record(MetricEvent::Remove, transmitted.len() as u64);
        info!(cache = %self.name, entries = transmitted.len(), "Entries transmitted");
        transmitted
    }

    /// Stores received objects. A key that already has an entry keeps it; the
    /// received object is handed back in the returned list.
    pub fn receive<I>(&self, entries: I) -> Vec<(Key, Box<dyn CachedObject>)>
    where
        I: IntoIterator<Item = (Key, Box<dyn CachedObject>)>,
    {
        let _mode = self.gate.enter(CacheMode::Receive);
        let lock = self.config.read().lock;
        let no_factory = |key: &Key| -> Result<Arc<Entry>> {
            Err(CacheError::Creation {
                key: key.to_string(),
                reason: "received entry already consumed".to_string(),
            })
        };

        let mut accepted = 0;
        let mut rejected = Vec::new();
        for (key, object) in entries {
            let mut candidate = Some(Arc::new(Entry::new(key.clone(), object, lock)));

            match self.find_or_insert(&key, &mut candidate, &no_factory) {
                Ok((_, true)) => accepted += 1,
                Ok((_, false)) | Err(_) => {
                    if let Some(entry) = candidate {
                        rejected.push((key, entry.vacate()));
                    }
                }
            }
        }

        self.metrics.record(MetricEvent::Create, accepted);
        info!(
            cache = %self.name,
            accepted,
            rejected = rejected.len(),
            "Entries received"
        );
        rejected
    }
}
