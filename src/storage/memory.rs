//! Memory occupancy probes.
//!
//! Bin resizes pace themselves against a [`MemoryMonitor`], and the
//! maintenance scheduler derives its memory level from one.

use std::sync::atomic::{AtomicU64, Ordering};

pub trait MemoryMonitor: Send + Sync {
    /// Current occupancy as a percentage, 0–100.
    fn occupancy_percent(&self) -> u8;

    /// Called after every maintenance pass with the aggregate object size.
    fn observe_total_size(&self, _total_size: u64) {}

    /// Called when the cache's `size.max` changes.
    fn set_budget(&self, _budget: u64) {}
}

/// A monitor that never reports pressure.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPressure;

impl MemoryMonitor for NoPressure {
    fn occupancy_percent(&self) -> u8 {
        0
    }
}

/// Occupancy measured as the last observed aggregate size against a budget.
#[derive(Debug)]
pub struct SizeBudgetMonitor {
    budget: AtomicU64,
    used: AtomicU64,
}

impl SizeBudgetMonitor {
    pub fn new(budget: u64) -> Self {
        Self {
            budget: AtomicU64::new(budget),
            used: AtomicU64::new(0),
        }
    }

    pub fn budget(&self) -> u64 {
        self.budget.load(Ordering::Relaxed)
    }
}

impl MemoryMonitor for SizeBudgetMonitor {
    fn occupancy_percent(&self) -> u8 {
        let budget = self.budget();
        if budget == 0 {
            return 0;
        }
        let used = u128::from(self.used.load(Ordering::Relaxed));
        (used * 100 / u128::from(budget)).min(100) as u8
    }

    fn observe_total_size(&self, total_size: u64) {
        self.used.store(total_size, Ordering::Relaxed);
    }

    fn set_budget(&self, budget: u64) {
        self.budget.store(budget, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_budget_occupancy() {
        let monitor = SizeBudgetMonitor::new(1_000);
        assert_eq!(monitor.occupancy_percent(), 0);

        monitor.observe_total_size(250);
        assert_eq!(monitor.occupancy_percent(), 25);

        monitor.observe_total_size(5_000);
        assert_eq!(monitor.occupancy_percent(), 100);
    }

    #[test]
    fn test_budget_change_rescales_occupancy() {
        let monitor = SizeBudgetMonitor::new(0);
        monitor.observe_total_size(400);
        assert_eq!(monitor.occupancy_percent(), 0);

        monitor.set_budget(500);
        assert_eq!(monitor.budget(), 500);
        assert_eq!(monitor.occupancy_percent(), 80);

        monitor.set_budget(0);
        assert_eq!(monitor.occupancy_percent(), 0);
    }

    #[test]
    fn test_unbounded_budget() {
        let monitor = SizeBudgetMonitor::new(0);
        monitor.observe_total_size(u64::MAX);
        assert_eq!(monitor.occupancy_percent(), 0);
    }
}
