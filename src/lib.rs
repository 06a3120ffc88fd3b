//! # flashgrid - An Embedded, Sharded, In-Memory Object Store
//!
//! flashgrid is the storage core of a caching grid. Clients read and write
//! user-supplied objects by key; the store handles concurrent access,
//! periodic maintenance and eviction, and growing its shard counts while
//! traffic keeps flowing.
//!
//! ## Features
//!
//! - **Ticket Locks**: FIFO-admitted read/write locks built for short critical sections
//! - **Two-Level Sharding**: buckets of bins, each bin and each entry separately locked
//! - **Live Resharding**: bin resize per bucket, bucket multiplication per cache
//! - **Soft Flush**: removals staggered over a requested time window
//! - **Background Maintenance**: one thread per cache, jittered period
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              flashgrid                                  │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │  Registry   │───>│   Factory   │───>│   Cache     │                  │
//! │  │ (factories, │    │  Wrapper    │    │ read_only / │                  │
//! │  │  metrics)   │    └─────────────┘    │ write_only  │                  │
//! │  └─────────────┘                       └──────┬──────┘                  │
//! │                                               │                         │
//! │                                               ▼                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐   │
//! │  │ ConfigSnap- │    │ Bucket 0   Bucket 1   Bucket 2   ...         │   │
//! │  │ shot        │    │  ┌─────┐    ┌─────┐    ┌─────┐               │   │
//! │  │             │    │  │Bins │    │Bins │    │Bins │  TicketLock   │   │
//! │  └─────────────┘    │  └─────┘    └─────┘    └─────┘  per bin      │   │
//! │                     └──────────────────────────────────────────────┘   │
//! │                                               ▲                         │
//! │                                               │                         │
//! │                     ┌─────────────────────────┴───────────────────────┐ │
//! │                     │          MaintenanceScheduler                   │ │
//! │                     │     (eviction passes, bin resizes)              │ │
//! │                     └─────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use flashgrid::config::{ConfigSnapshot, BUCKET_COUNT};
//! use flashgrid::registry::Registry;
//! use flashgrid::storage::{Cache, Key, MaintenanceScheduler};
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(Registry::with_bundled());
//! let cache = Arc::new(
//!     Cache::builder("sessions")
//!         .registry(Arc::clone(&registry))
//!         .factory("counter")
//!         .config(ConfigSnapshot::new().with(BUCKET_COUNT, 8))
//!         .build()
//!         .unwrap(),
//! );
//! let _maintenance = MaintenanceScheduler::start(Arc::clone(&cache)).unwrap();
//!
//! let key = Key::from("visits");
//! cache.write_only(&key, &Bytes::from("1")).unwrap();
//! cache.write_only(&key, &Bytes::from("2")).unwrap();
//! assert_eq!(cache.read_only(&key, &Bytes::new()).unwrap(), Some(Bytes::from("3")));
//! ```
//!
//! ## Module Overview
//!
//! - [`sync`]: ticket lock, plain fallback lock, and the guarded `ShardLock`
//! - [`storage`]: keys, entries, bins, buckets, the cache and its scheduler
//! - [`objects`]: bundled `blob` and `counter` object classes
//! - [`config`]: configuration snapshots and typed cache tunables
//! - [`metrics`]: the metrics sink interface and its atomic implementation
//! - [`registry`]: the runtime-owned registry of factories and metrics sinks
//!
//! ## Design Highlights
//!
//! ### Admission-Ordered Locks
//!
//! A reader advances the ticket queue as soon as it is admitted, not when it
//! releases, so consecutive readers overlap while a queued writer still
//! blocks every reader that arrived after it.
//!
//! ### Dual-Count Routing
//!
//! Every shard level keeps a current and a previous count. While a resize is
//! in flight, lookups check the previous-count shard first and the
//! current-count shard second; entries only ever move from the former to the
//! latter, so a lookup cannot miss an entry that is in transit.
//!
//! ### Locks Are Not Reentrant
//!
//! Acquiring a ticket lock that the current thread already holds deadlocks.
//! Object callbacks run under their entry's lock and must not call back into
//! the same entry.

pub mod config;
pub mod error;
pub mod metrics;
pub mod objects;
pub mod registry;
pub mod storage;
pub mod sync;

// Re-export commonly used types for convenience
pub use config::{CacheConfig, ConfigHub, ConfigSnapshot};
pub use error::{CacheError, ConfigError, ObjectError, Result};
pub use metrics::{CacheMetrics, MetricEvent, MetricsSink, MetricsSnapshot};
pub use registry::Registry;
pub use storage::{Cache, CacheBuilder, CacheMode, Key, MaintenanceScheduler};
pub use sync::{LockConfig, LockKind, TicketLock};

/// Version of flashgrid
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
