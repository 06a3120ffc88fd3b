//! Plain fallback lock built on `parking_lot`'s raw read/write lock.
//!
//! No ticket counters and no admission order; used for bootstrap and
//! low-contention structures where the simplest correct lock is preferable.

use super::ticket::Ticket;
use parking_lot::lock_api::RawRwLock as _;

pub struct PlainLock {
    raw: parking_lot::RawRwLock,
}

impl std::fmt::Debug for PlainLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainLock")
            .field("locked", &self.raw.is_locked())
            .finish()
    }
}

impl Default for PlainLock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlainLock {
    pub fn new() -> Self {
        Self {
            raw: parking_lot::RawRwLock::INIT,
        }
    }

    pub fn acquire_read(&self) -> Ticket {
        self.raw.lock_shared();
        Ticket::new(Ticket::UNORDERED)
    }

    /// # Safety
    ///
    /// The caller must hold a shared lock obtained from this same lock.
    pub unsafe fn release_read(&self, _ticket: Ticket) {
        // SAFETY: forwarded from the caller.
        unsafe { self.raw.unlock_shared() }
    }

    pub fn acquire_write(&self) -> Ticket {
        self.raw.lock_exclusive();
        Ticket::new(Ticket::UNORDERED)
    }

    /// # Safety
    ///
    /// The caller must hold the exclusive lock obtained from this same lock.
    pub unsafe fn release_write(&self, _ticket: Ticket) {
        // SAFETY: forwarded from the caller.
        unsafe { self.raw.unlock_exclusive() }
    }

    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }
}
