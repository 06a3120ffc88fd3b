//! Bundled Object Classes
//!
//! Two ready-made [`CachedObject`](crate::storage::CachedObject)
//! implementations, registered by [`Registry::with_bundled`](crate::registry::Registry::with_bundled):
//!
//! | Class     | Write request          | Read response     | Deletable when            |
//! |-----------|------------------------|-------------------|---------------------------|
//! | `blob`    | the new value (empty clears) | the value   | cleared, or past expiry   |
//! | `counter` | a signed decimal delta | the decimal value | zero, or past flush time  |
//!
//! A `counter` can absorb a `blob` whose value parses as an integer, which is
//! what a class upgrade from `blob` to `counter` relies on.

pub mod blob;
pub mod counter;

pub use blob::{BlobFactory, BlobObject, BLOB_EVICT_LEVEL, BLOB_TTL_MS};
pub use counter::{CounterFactory, CounterObject};

/// Class tag and registry name of [`BlobObject`].
pub const BLOB_CLASS: &str = "blob";

/// Class tag and registry name of [`CounterObject`].
pub const COUNTER_CLASS: &str = "counter";
