//! flashgrid - load driver
//!
//! Builds a cache from the bundled object classes, starts its maintenance
//! thread, and hammers it with a read/write mix from a pool of blocking
//! workers until the run time elapses or Ctrl+C arrives. Optionally multiplies
//! the bucket count in the middle of the run.

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use flashgrid::config::{
    ConfigSnapshot, BIN_COUNT_MIN, BUCKET_COUNT, LOCK_KIND, LOCK_MAX_SPIN_US,
    MAINTENANCE_PERIOD_MS, SIZE_MAX,
};
use flashgrid::objects::COUNTER_CLASS;
use flashgrid::registry::Registry;
use flashgrid::storage::{Cache, Key, MaintenanceScheduler};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Drive a synthetic load against a flashgrid cache", long_about = None)]
struct Args {
    /// Initial number of buckets
    #[arg(long, env = "FLASHGRID_BUCKETS", default_value = "4")]
    buckets: usize,

    /// Initial (and minimum) number of bins per bucket
    #[arg(long, env = "FLASHGRID_BINS", default_value = "11")]
    bins: usize,

    /// Object class created on a write miss (blob or counter)
    #[arg(long, env = "FLASHGRID_FACTORY", default_value = "blob")]
    factory: String,

    /// Lock variant for bins and entries (ticket or plain)
    #[arg(long, env = "FLASHGRID_LOCK", default_value = "ticket")]
    lock: String,

    /// Ticket lock spin budget in microseconds before parking (0 = spin forever)
    #[arg(long, env = "FLASHGRID_MAX_SPIN_US", default_value = "50")]
    max_spin_us: u64,

    /// Number of worker threads
    #[arg(short, long, default_value = "8")]
    threads: usize,

    /// Size of the key space
    #[arg(short, long, default_value = "100000")]
    keys: usize,

    /// Percentage of operations that are reads
    #[arg(long, default_value = "80", value_parser = clap::value_parser!(u8).range(0..=100))]
    read_pct: u8,

    /// Run time in seconds
    #[arg(short, long, default_value = "10")]
    duration_secs: u64,

    /// Maintenance period in milliseconds
    #[arg(long, default_value = "1000")]
    maintenance_ms: u64,

    /// Aggregate object size budget in bytes (0 = unbounded)
    #[arg(long, default_value = "0")]
    size_max: u64,

    /// Multiply the bucket count this many seconds into the run
    #[arg(long)]
    multiply_after_secs: Option<u64>,

    /// Factor used by --multiply-after-secs
    #[arg(long, default_value = "2")]
    multiply_factor: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Debug, Default, Clone, Copy)]
struct WorkerStats {
    reads: u64,
    hits: u64,
    writes: u64,
    errors: u64,
}

impl WorkerStats {
    fn merge(&mut self, other: WorkerStats) {
        self.reads += other.reads;
        self.hits += other.hits;
        self.writes += other.writes;
        self.errors += other.errors;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!(
        version = flashgrid::VERSION,
        threads = args.threads,
        keys = args.keys,
        duration_secs = args.duration_secs,
        "flashgrid load driver starting"
    );

    let snapshot = ConfigSnapshot::new()
        .with(BUCKET_COUNT, args.buckets)
        .with(BIN_COUNT_MIN, args.bins)
        .with(LOCK_KIND, &args.lock)
        .with(LOCK_MAX_SPIN_US, args.max_spin_us)
        .with(MAINTENANCE_PERIOD_MS, args.maintenance_ms)
        .with(SIZE_MAX, args.size_max);

    let registry = Arc::new(Registry::with_bundled());
    let cache = Arc::new(
        Cache::builder("load")
            .registry(Arc::clone(&registry))
            .factory(args.factory.as_str())
            .config(snapshot)
            .build()
            .context("failed to build cache")?,
    );
    let _maintenance = MaintenanceScheduler::start(Arc::clone(&cache))
        .context("failed to start maintenance thread")?;

    let stop = Arc::new(AtomicBool::new(false));
    let counters = cache.factory_class() == COUNTER_CLASS;
    let started = Instant::now();

    let mut workers = Vec::with_capacity(args.threads);
    for worker in 0..args.threads {
        let cache = Arc::clone(&cache);
        let stop = Arc::clone(&stop);
        let keys = args.keys.max(1);
        let read_pct = args.read_pct;
        workers.push(tokio::task::spawn_blocking(move || {
            drive(worker, &cache, &stop, keys, read_pct, counters)
        }));
    }

    let multiply_started = Arc::new(AtomicBool::new(false));
    let multiplier = args.multiply_after_secs.map(|secs| {
        let cache = Arc::clone(&cache);
        let started = Arc::clone(&multiply_started);
        let factor = args.multiply_factor;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            started.store(true, Ordering::SeqCst);
            tokio::task::spawn_blocking(move || cache.multiply_bucket_count(factor)).await
        })
    });

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.duration_secs)) => {
            info!("Run time elapsed, stopping workers...");
        }
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for Ctrl+C");
            }
            info!("Shutdown signal received, stopping workers...");
        }
    }
    stop.store(true, Ordering::Relaxed);

    let mut totals = WorkerStats::default();
    for worker in workers {
        totals.merge(worker.await.context("worker panicked")?);
    }

    if let Some(handle) = multiplier {
        if multiply_started.load(Ordering::SeqCst) {
            if !handle.is_finished() {
                info!("Bucket multiplication still running, waiting for it");
            }
            // A blocking multiplication cannot be aborted; let it finish.
            match handle.await.context("multiplier panicked")? {
                Ok(Ok(moved)) => info!(moved, buckets = cache.bucket_count(), "Bucket count multiplied"),
                Ok(Err(e)) => warn!(error = %e, "Bucket multiplication failed"),
                Err(e) => warn!(error = %e, "Bucket multiplication task failed"),
            }
        } else {
            handle.abort();
            warn!("Run ended before the bucket multiplication started");
        }
    }

    let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);
    let ops = totals.reads + totals.writes;
    let stats = cache.stats();
    info!(
        ops,
        ops_per_sec = %format!("{:.0}", ops as f64 / elapsed),
        reads = totals.reads,
        hit_rate = %format!("{:.2}%", totals.hits as f64 * 100.0 / totals.reads.max(1) as f64),
        writes = totals.writes,
        errors = totals.errors,
        "Load complete"
    );
    info!(
        buckets = stats.bucket_count,
        bins = stats.bin_count,
        items = stats.item_count,
        creates = stats.metrics.creates,
        removes = stats.metrics.removes,
        expires = stats.metrics.expires,
        "Cache state"
    );

    Ok(())
}

/// One worker's request loop.
fn drive(
    worker: usize,
    cache: &Cache,
    stop: &AtomicBool,
    keys: usize,
    read_pct: u8,
    counters: bool,
) -> WorkerStats {
    let mut rng = rand::rng();
    let mut stats = WorkerStats::default();
    let read_probability = f64::from(read_pct) / 100.0;
    let empty = Bytes::new();

    while !stop.load(Ordering::Relaxed) {
        let key = Key::from(format!("key-{}", rng.random_range(0..keys)));

        if rng.random_bool(read_probability) {
            stats.reads += 1;
            match cache.read_only(&key, &empty) {
                Ok(Some(_)) => stats.hits += 1,
                Ok(None) => {}
                Err(e) => {
                    stats.errors += 1;
                    debug!(worker, key = %key, error = %e, "Read failed");
                }
            }
        } else {
            stats.writes += 1;
            let request = if counters {
                Bytes::from_static(b"1")
            } else {
                Bytes::from(format!("value-{}-{}", worker, stats.writes))
            };
            if let Err(e) = cache.write_only(&key, &request) {
                stats.errors += 1;
                debug!(worker, key = %key, error = %e, "Write failed");
            }
        }
    }

    stats
}

fn init_logging(level: &str) {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}
