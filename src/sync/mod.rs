//! Synchronization Primitives
//!
//! Every shared map and every stored object in flashgrid is protected by a
//! [`ShardLock`], which wraps one of two raw locks:
//!
//! - [`TicketLock`]: non-reentrant, ticket-ordered, spin-then-park. The
//!   default for hot paths.
//! - [`PlainLock`]: `parking_lot`'s read/write lock, for bootstrap and
//!   low-contention use.
//!
//! ## Example
//!
//! ```
//! use flashgrid::sync::{LockConfig, ShardLock, TicketLock};
//!
//! let lock = TicketLock::new();
//! let ticket = lock.acquire_write();
//! lock.release_write(ticket);
//!
//! let counter = ShardLock::new(0u64, LockConfig::default());
//! *counter.write() += 1;
//! assert_eq!(*counter.read(), 1);
//! ```

pub mod lock;
pub mod plain;
pub mod ticket;

pub use lock::{LockConfig, LockKind, RawLock, ShardLock, ShardReadGuard, ShardWriteGuard};
pub use plain::PlainLock;
pub use ticket::{Ticket, TicketLock};
