//! Background maintenance thread
//!
//! One scheduler runs per cache on its own OS thread. Every period it runs an
//! eviction pass (lowering the memory level while the cache is over its size
//! budget) followed by a bin resize check.
//!
//! The period is jittered by `maintenance.jitter.pct` each cycle so that many
//! caches started together do not all sweep at the same instant.

use crate::error::Result;
use crate::storage::cache::Cache;
use crate::storage::maintenance::now_ms;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use rand::Rng;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace};

/// A handle to a running maintenance thread.
///
/// Dropping the handle stops the thread and waits for it to exit.
#[derive(Debug)]
pub struct MaintenanceScheduler {
    cache: String,
    shutdown_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MaintenanceScheduler {
    /// Spawns the maintenance thread for `cache`.
    pub fn start(cache: Arc<Cache>) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);
        let name = cache.name().to_string();

        let handle = thread::Builder::new()
            .name(format!("maintenance-{}", name))
            .spawn(move || {
                loop {
                    let config = cache.config();
                    let period =
                        jittered(config.maintenance_period, config.maintenance_jitter_pct);

                    match shutdown_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => run_pass(&cache),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                            debug!(cache = %cache.name(), "Maintenance thread received shutdown signal");
                            return;
                        }
                    }
                }
            })?;

        info!(cache = %name, "Maintenance scheduler started");
        Ok(Self {
            cache: name,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Stops the thread. Called automatically on drop.
    pub fn stop(&mut self) {
        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            return;
        };
        let _ = shutdown_tx.send(());

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        info!(cache = %self.cache, "Maintenance scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for MaintenanceScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_pass(cache: &Cache) {
    match cache.run_scheduled_pass(now_ms()) {
        Some((report, resized)) => {
            debug!(
                cache = %cache.name(),
                removed = report.removed,
                kept = report.kept,
                size = report.total_size,
                failures = report.failures,
                resized_buckets = resized,
                "Maintenance pass complete"
            );
        }
        None => {
            trace!(cache = %cache.name(), mode = %cache.mode(), "Cache busy, skipping maintenance pass");
        }
    }
}

/// `period` scaled by a random factor in `[1 - pct/100, 1 + pct/100]`.
fn jittered(period: Duration, jitter_pct: u8) -> Duration {
    if jitter_pct == 0 || period.is_zero() {
        return period;
    }
    let spread = f64::from(jitter_pct.min(100)) / 100.0;
    let factor = rand::rng().random_range(1.0 - spread..=1.0 + spread);
    period.mul_f64(factor)
}

/// Smallest prime `>= n` (2 for anything below 2).
pub fn next_prime(n: usize) -> usize {
    let mut candidate = n.max(2);
    while !is_prime(candidate) {
        candidate += 1;
    }
    candidate
}

fn is_prime(n: usize) -> bool {
    if n < 4 {
        return n >= 2;
    }
    if n % 2 == 0 {
        return false;
    }
    let mut divisor = 3;
    while divisor * divisor <= n {
        if n % divisor == 0 {
            return false;
        }
        divisor += 2;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigSnapshot, MAINTENANCE_JITTER_PCT, MAINTENANCE_PERIOD_MS};
    use crate::storage::Key;
    use bytes::Bytes;

    #[test]
    fn test_next_prime() {
        assert_eq!(next_prime(0), 2);
        assert_eq!(next_prime(11), 11);
        assert_eq!(next_prime(50), 53);
        assert_eq!(next_prime(100), 101);
        assert_eq!(next_prime(7_920), 7_927);
    }

    #[test]
    fn test_jitter_bounds() {
        let period = Duration::from_millis(1_000);
        for _ in 0..100 {
            let jittered = jittered(period, 10);
            assert!(jittered >= Duration::from_millis(900));
            assert!(jittered <= Duration::from_millis(1_100));
        }
        assert_eq!(jittered(period, 0), period);
    }

    #[test]
    fn test_scheduler_runs_passes() {
        let cache = Arc::new(
            Cache::new(
                "scheduled",
                ConfigSnapshot::new()
                    .with(MAINTENANCE_PERIOD_MS, 10)
                    .with(MAINTENANCE_JITTER_PCT, 0),
            )
            .unwrap(),
        );
        cache
            .write_only(&Key::from("gone"), &Bytes::from("v"))
            .unwrap();
        cache.get(&Key::from("gone")).unwrap().write().flush(0, 0);

        let scheduler = MaintenanceScheduler::start(Arc::clone(&cache)).unwrap();
        assert!(scheduler.is_running());
        thread::sleep(Duration::from_millis(200));

        assert_eq!(cache.item_count(), 0);
        assert!(cache.stats().last_maintenance.is_some());
    }

    #[test]
    fn test_scheduler_stops_on_drop() {
        let cache = Arc::new(
            Cache::new("stopped", ConfigSnapshot::new().with(MAINTENANCE_PERIOD_MS, 10)).unwrap(),
        );
        {
            let _scheduler = MaintenanceScheduler::start(Arc::clone(&cache)).unwrap();
            thread::sleep(Duration::from_millis(50));
        }

        // The thread held a clone; after the join only ours is left.
        assert_eq!(Arc::strong_count(&cache), 1);
    }
}
