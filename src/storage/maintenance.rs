//! Maintenance requests, reports, and time helpers shared by the shard levels.

use crate::config::ConfigSnapshot;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Input of one maintenance pass.
#[derive(Debug, Clone)]
pub struct MaintenanceRequest {
    pub now_ms: u64,
    /// Memory headroom 0–100; lower means evict harder
    pub memory_level: u8,
    /// When set, every visited object receives this configuration first
    pub configuration: Option<ConfigSnapshot>,
}

impl MaintenanceRequest {
    pub fn new(now_ms: u64, memory_level: u8) -> Self {
        Self {
            now_ms,
            memory_level: memory_level.min(100),
            configuration: None,
        }
    }

    pub fn with_configuration(mut self, snapshot: ConfigSnapshot) -> Self {
        self.configuration = Some(snapshot);
        self
    }
}

/// Accumulated outcome of a maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Entries removed because their object became deletable
    pub removed: u64,
    /// Entries kept
    pub kept: u64,
    /// Aggregate size of the kept objects
    pub total_size: u64,
    /// Entries whose maintenance callback failed (they are kept)
    pub failures: u64,
    /// Sweeps over the cache that produced this report
    pub passes: u32,
}

/// Splits `[start_ms, start_ms + window_ms)` into consecutive sub-windows,
/// one per slot, each proportional to that slot's item count.
///
/// Spreading items over the sub-windows this way places the i-th of n items
/// at `start + window * i / n`, whatever the per-slot counts are.
pub fn spread_windows(counts: &[usize], start_ms: u64, window_ms: u64) -> Vec<(u64, u64)> {
    let total: u128 = counts.iter().map(|&c| c as u128).sum();
    if total == 0 {
        return counts.iter().map(|_| (start_ms, 0)).collect();
    }

    let window = u128::from(window_ms);
    let mut offset = 0u128;
    counts
        .iter()
        .map(|&count| {
            let begin = start_ms + (window * offset / total) as u64;
            offset += count as u128;
            let end = start_ms + (window * offset / total) as u64;
            (begin, end - begin)
        })
        .collect()
}
