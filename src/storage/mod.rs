//! Storage Engine Module
//!
//! The sharded object store: a [`Cache`] holds buckets, a [`Bucket`] holds
//! bins, and a [`Bin`] maps keys to entries. Each level can be resharded while
//! requests keep running.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Cache          bucket = hash_for_bucket % bucket_count       │
//! │  ┌────────────────────┐ ┌────────────────────┐               │
//! │  │ Bucket 0           │ │ Bucket 1           │  ...          │
//! │  │ bin = hash_for_bin │ │                    │               │
//! │  │       % bin_count  │ │                    │               │
//! │  │ ┌─────┐ ┌─────┐    │ │ ┌─────┐ ┌─────┐    │               │
//! │  │ │Bin 0│ │Bin 1│ ...│ │ │Bin 0│ │Bin 1│ ...│               │
//! │  │ └─────┘ └─────┘    │ │ └─────┘ └─────┘    │               │
//! │  └────────────────────┘ └────────────────────┘               │
//! └──────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │
//!              ┌─────────────┴─────────────┐
//!              │   MaintenanceScheduler    │
//!              │    (one OS thread)        │
//!              └───────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Two-level sharding**: every bin has its own lock, every entry has another
//! - **Live bin resize**: buckets grow their bin count without blocking lookups
//! - **Bucket multiplication**: bucket counts only grow by integer factors
//! - **Soft flush**: removals can be staggered over a time window
//! - **Background maintenance**: eviction under a size budget, then bin resizes
//!
//! ## Example
//!
//! ```
//! use flashgrid::config::ConfigSnapshot;
//! use flashgrid::storage::{Cache, Key};
//! use bytes::Bytes;
//!
//! let cache = Cache::new("example", ConfigSnapshot::new()).unwrap();
//!
//! let key = Key::from("name");
//! cache.write_only(&key, &Bytes::from("Ariz")).unwrap();
//! assert_eq!(cache.read_only(&key, &Bytes::new()).unwrap(), Some(Bytes::from("Ariz")));
//!
//! cache.multiply_bucket_count(2).unwrap();
//! assert_eq!(cache.read_only(&key, &Bytes::new()).unwrap(), Some(Bytes::from("Ariz")));
//! ```

pub mod bin;
pub mod bucket;
pub mod cache;
pub mod entry;
pub mod key;
pub mod maintenance;
pub mod memory;
pub mod object;
pub mod scheduler;

// Re-export commonly used types
pub use bin::Bin;
pub use bucket::{Bucket, ResizePacing};
pub use cache::{Cache, CacheBuilder, CacheMode, CacheStats};
pub use entry::Entry;
pub use key::Key;
pub use maintenance::{now_ms, spread_windows, MaintenanceReport, MaintenanceRequest};
pub use memory::{MemoryMonitor, NoPressure, SizeBudgetMonitor};
pub use object::{CachedObject, FactoryWrapper, ObjectFactory};
pub use scheduler::{next_prime, MaintenanceScheduler};
