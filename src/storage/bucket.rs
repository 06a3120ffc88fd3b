//! Buckets: an array of bins with a resizable bin count.
//!
//! ## Routing during a resize
//!
//! ```text
//!             bin_count_previous = 11         bin_count_current = 101
//!   lookup ──> bins[h % 11]  ── miss ──>  bins[h % 101]
//!              (never creates)             (creates on miss)
//! ```
//!
//! While `bin_count_previous != 0` a key lives in exactly one of the two
//! candidate bins, so lookups check the previous-count bin first, then the
//! current-count bin. The counts are plain atomics read without any lock; a
//! reader that raced a count change simply routes again.
//!
//! The bin array is an arena: it grows before the new count is published and
//! is only truncated after every entry has left the trimmed bins.

use crate::error::{CacheError, Result};
use crate::storage::bin::{Bin, Insertion};
use crate::storage::entry::Entry;
use crate::storage::key::Key;
use crate::storage::maintenance::{spread_windows, MaintenanceReport, MaintenanceRequest};
use crate::storage::memory::{MemoryMonitor, NoPressure};
use crate::storage::object::{CachedObject, FactoryWrapper};
use crate::sync::LockConfig;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Outcome of routing a key to its entry, creating one if needed.
pub(crate) enum Slot {
    Existing(Arc<Entry>),
    Inserted(Arc<Entry>),
    /// A shard count above this bucket changed; route from the top again.
    Rerouted,
}

/// Memory-aware pacing applied between bins during a resize walk.
#[derive(Clone, Copy)]
pub struct ResizePacing<'a> {
    monitor: &'a dyn MemoryMonitor,
    occupancy_pct: u8,
    pause: Duration,
}

impl<'a> ResizePacing<'a> {
    pub fn new(monitor: &'a dyn MemoryMonitor, occupancy_pct: u8, pause: Duration) -> Self {
        Self {
            monitor,
            occupancy_pct,
            pause,
        }
    }

    /// Pacing that never pauses.
    pub fn unpaced() -> ResizePacing<'static> {
        ResizePacing {
            monitor: &NoPressure,
            occupancy_pct: 100,
            pause: Duration::ZERO,
        }
    }

    /// Sleeps once if occupancy is above the threshold. Returns true if it did.
    fn pace(&self) -> bool {
        let occupancy = self.monitor.occupancy_percent();
        if occupancy > self.occupancy_pct {
            trace!(occupancy, threshold = self.occupancy_pct, "Pausing resize walk");
            thread::sleep(self.pause);
            true
        } else {
            false
        }
    }
}

pub struct Bucket {
    bins: RwLock<Vec<Arc<Bin>>>,
    bin_count_current: AtomicUsize,
    /// 0 when no resize is in flight
    bin_count_previous: AtomicUsize,
    /// Serialises resizes of this bucket
    resizing: Mutex<()>,
    lock: LockConfig,
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("bin_count", &self.bin_count())
            .field("previous_bin_count", &self.previous_bin_count())
            .field("items", &self.item_count())
            .finish()
    }
}

impl Bucket {
    pub fn new(bin_count: usize, lock: LockConfig) -> Self {
        let bin_count = bin_count.max(1);
        Self {
            bins: RwLock::new((0..bin_count).map(|_| Arc::new(Bin::new(lock))).collect()),
            bin_count_current: AtomicUsize::new(bin_count),
            bin_count_previous: AtomicUsize::new(0),
            resizing: Mutex::new(()),
            lock,
        }
    }

    pub fn bin_count(&self) -> usize {
        self.bin_count_current.load(Ordering::SeqCst)
    }

    /// Bin count before the resize in flight, or 0.
    pub fn previous_bin_count(&self) -> usize {
        self.bin_count_previous.load(Ordering::SeqCst)
    }

    pub fn is_resizing(&self) -> bool {
        self.previous_bin_count() != 0
    }

    pub fn item_count(&self) -> usize {
        self.snapshot().iter().map(|bin| bin.len()).sum()
    }

    pub fn keys(&self) -> Vec<Key> {
        self.snapshot().iter().flat_map(|bin| bin.keys()).collect()
    }

    /// Current bin for `index`, if the arena holds one.
    pub fn bin_at(&self, index: usize) -> Option<Arc<Bin>> {
        self.bins.read().get(index).cloned()
    }

    fn snapshot(&self) -> Vec<Arc<Bin>> {
        self.bins.read().clone()
    }

    /// Reads `(current, previous)`. Current is read first: a reader that sees
    /// a new current count is guaranteed to see the matching previous count.
    #[inline]
    fn counts(&self) -> (usize, usize) {
        let current = self.bin_count_current.load(Ordering::SeqCst);
        let previous = self.bin_count_previous.load(Ordering::SeqCst);
        (current, previous)
    }

    fn lookup(&self, key: &Key, current: usize, previous: usize) -> Option<Arc<Entry>> {
        if previous != 0 {
            if let Some(entry) = self
                .bin_at(key.bin_index(previous))
                .and_then(|bin| bin.get(key))
            {
                return Some(entry);
            }
        }
        self.bin_at(key.bin_index(current))?.get(key)
    }

    /// Looks up `key` without creating anything.
    pub fn get(&self, key: &Key) -> Option<Arc<Entry>> {
        loop {
            let (current, previous) = self.counts();
            let found = self.lookup(key, current, previous);
            if found.is_some() || self.counts() == (current, previous) {
                return found;
            }
        }
    }

    /// Returns the entry for `key`, creating it in the current-count bin on a
    /// miss. The previous-count bin is checked first and never created in.
    pub fn get_entry<F>(&self, key: &Key, factory: F) -> Result<Arc<Entry>>
    where
        F: Fn(&Key) -> Result<Box<dyn CachedObject>>,
    {
        let make = |key: &Key| -> Result<Arc<Entry>> {
            Ok(Arc::new(Entry::new(key.clone(), factory(key)?, self.lock)))
        };
        let mut candidate = None;

        loop {
            match self.find_or_insert(key, &mut candidate, &make, &|| true)? {
                Slot::Existing(entry) | Slot::Inserted(entry) => return Ok(entry),
                Slot::Rerouted => continue,
            }
        }
    }

    /// Finds `key` or inserts a new entry for it.
    ///
    /// `candidate` carries an already-built entry across retries so the
    /// factory does not run again after a reroute; on return it holds any
    /// entry that was built but not stored. `outer_routed` is re-checked under
    /// the destination bin's lock so that a bucket-count change above this
    /// bucket aborts the insert.
    pub(crate) fn find_or_insert(
        &self,
        key: &Key,
        candidate: &mut Option<Arc<Entry>>,
        make: &dyn Fn(&Key) -> Result<Arc<Entry>>,
        outer_routed: &dyn Fn() -> bool,
    ) -> Result<Slot> {
        loop {
            let (current, previous) = self.counts();

            if previous != 0 {
                if let Some(entry) = self
                    .bin_at(key.bin_index(previous))
                    .and_then(|bin| bin.get(key))
                {
                    return Ok(Slot::Existing(entry));
                }
            }

            let Some(bin) = self.bin_at(key.bin_index(current)) else {
                continue;
            };
            if let Some(entry) = bin.get(key) {
                return Ok(Slot::Existing(entry));
            }

            let entry = match candidate.take() {
                Some(entry) => entry,
                None => make(key)?,
            };
            let still_routed =
                || self.bin_count_current.load(Ordering::SeqCst) == current && outer_routed();

            match bin.insert_routed(entry, &still_routed) {
                Insertion::Inserted(entry) => return Ok(Slot::Inserted(entry)),
                Insertion::Occupied { winner, rejected } => {
                    *candidate = Some(rejected);
                    return Ok(Slot::Existing(winner));
                }
                Insertion::Rerouted(entry) => {
                    *candidate = Some(entry);
                    if !outer_routed() {
                        return Ok(Slot::Rerouted);
                    }
                }
            }
        }
    }

    /// Removes `key` from both candidate bins.
    pub fn delete_entry(&self, key: &Key) -> Option<Arc<Entry>> {
        self.remove_where(key, &|_| true)
    }

    /// Removes `key` from whichever candidate bin holds it, if `predicate`
    /// accepts the stored entry.
    pub(crate) fn remove_where(
        &self,
        key: &Key,
        predicate: &dyn Fn(&Arc<Entry>) -> bool,
    ) -> Option<Arc<Entry>> {
        loop {
            let (current, previous) = self.counts();

            let from_previous = if previous != 0 {
                self.bin_at(key.bin_index(previous))
                    .and_then(|bin| bin.remove_if(key, predicate))
            } else {
                None
            };
            let from_current = self
                .bin_at(key.bin_index(current))
                .and_then(|bin| bin.remove_if(key, predicate));

            let removed = from_previous.or(from_current);
            if removed.is_some() || self.counts() == (current, previous) {
                return removed;
            }
        }
    }

    /// Bin that new entries for `key` go into under the current count.
    pub(crate) fn bin_for_insert(&self, key: &Key) -> Option<Arc<Bin>> {
        self.bin_at(key.bin_index(self.bin_count()))
    }

    /// Changes the bin count, moving every entry whose bin index changes.
    ///
    /// Readers keep working throughout: the previous count stays published
    /// until the walk is complete. Returns the number of entries moved.
    pub fn resize(&self, new_bin_count: usize, pacing: &ResizePacing<'_>) -> Result<usize> {
        if new_bin_count == 0 {
            return Err(CacheError::InvalidBinCount(new_bin_count));
        }

        let _resizing = self.resizing.lock();
        let old_bin_count = self.bin_count();
        if new_bin_count == old_bin_count && !self.is_resizing() {
            return Ok(0);
        }

        info!(
            from = old_bin_count,
            to = new_bin_count,
            items = self.item_count(),
            "Resizing bucket"
        );

        self.bin_count_previous
            .store(old_bin_count, Ordering::SeqCst);
        {
            let mut bins = self.bins.write();
            let len = bins.len();
            if new_bin_count > len {
                bins.extend((len..new_bin_count).map(|_| Arc::new(Bin::new(self.lock))));
            }
        }
        self.bin_count_current
            .store(new_bin_count, Ordering::SeqCst);

        // Walk the whole arena: after an interrupted resize, entries may sit
        // in either layout.
        let bins = self.snapshot();
        let mut moved = 0;
        let mut pauses = 0;
        for (index, bin) in bins.iter().enumerate() {
            moved += bin.relocate(|key| {
                let target = key.bin_index(new_bin_count);
                (target != index).then(|| Arc::clone(&bins[target]))
            });
            if pacing.pace() {
                pauses += 1;
            }
        }

        if new_bin_count < bins.len() {
            self.bins.write().truncate(new_bin_count);
        }
        self.bin_count_previous.store(0, Ordering::SeqCst);

        debug!(
            bins = new_bin_count,
            moved, pauses, "Bucket resize complete"
        );
        Ok(moved)
    }

    /// Moves every entry that no longer belongs to bucket `index` under
    /// `bucket_count` buckets into its bucket in `targets`.
    ///
    /// Returns the number of entries moved.
    pub fn move_items(
        &self,
        index: usize,
        bucket_count: usize,
        targets: &[Arc<Bucket>],
        pacing: &ResizePacing<'_>,
    ) -> usize {
        let mut moved = 0;
        for bin in self.snapshot() {
            moved += bin.relocate(|key| {
                let target = key.bucket_index(bucket_count);
                if target == index {
                    return None;
                }
                targets
                    .get(target)
                    .and_then(|bucket| bucket.bin_for_insert(key))
            });
            pacing.pace();
        }
        moved
    }

    /// Removes every entry immediately.
    pub fn flush_now(&self) -> usize {
        self.snapshot().iter().map(|bin| bin.flush_now()).sum()
    }

    /// Spreads a soft flush over `[window_start_ms, window_start_ms + window_ms)`,
    /// giving each bin a share of the window proportional to its item count.
    pub fn flush_spread(&self, now_ms: u64, window_start_ms: u64, window_ms: u64) -> usize {
        let bins = self.snapshot();
        let counts: Vec<usize> = bins.iter().map(|bin| bin.len()).collect();

        bins.iter()
            .zip(spread_windows(&counts, window_start_ms, window_ms))
            .map(|(bin, (start, window))| bin.flush_spread(now_ms, start, window))
            .sum()
    }

    pub fn do_maintenance(&self, request: &MaintenanceRequest, report: &mut MaintenanceReport) {
        for bin in self.snapshot() {
            bin.do_maintenance(request, report);
        }
    }

    pub fn upgrade_class(&self, old_class: &str, factory: &FactoryWrapper) -> Result<usize> {
        let mut upgraded = 0;
        for bin in self.snapshot() {
            upgraded += bin.upgrade_class(old_class, factory)?;
        }
        Ok(upgraded)
    }

    /// Removes and returns every entry.
    pub(crate) fn drain(&self) -> Vec<Arc<Entry>> {
        self.snapshot().iter().flat_map(|bin| bin.drain()).collect()
    }
}
