//! Data guarded by a configurable raw lock.
//!
//! [`ShardLock<T>`] is what bins and entries actually hold: the value plus
//! either a [`TicketLock`] or a [`PlainLock`], chosen by [`LockConfig`].
//! Access goes through RAII guards that hand the ticket back on drop.

use super::plain::PlainLock;
use super::ticket::{Ticket, TicketLock};
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::time::Duration;

/// Which lock implementation guards a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockKind {
    /// Ticket-ordered lock; the default for hot paths.
    #[default]
    Ticket,
    /// `parking_lot` read/write lock without counters.
    Plain,
}

impl FromStr for LockKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ticket" => Ok(LockKind::Ticket),
            "plain" => Ok(LockKind::Plain),
            other => Err(format!("unknown lock kind: {}", other)),
        }
    }
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKind::Ticket => f.write_str("ticket"),
            LockKind::Plain => f.write_str("plain"),
        }
    }
}

/// How every lock created for a cache is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    pub kind: LockKind,
    /// Spin budget for ticket locks (`None` = spin forever)
    pub max_spin: Option<Duration>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            kind: LockKind::Ticket,
            max_spin: Some(TicketLock::DEFAULT_MAX_SPIN),
        }
    }
}

impl LockConfig {
    pub fn plain() -> Self {
        Self {
            kind: LockKind::Plain,
            max_spin: None,
        }
    }
}

/// Either lock variant behind one acquire/release surface.
#[derive(Debug)]
pub enum RawLock {
    Ticket(TicketLock),
    Plain(PlainLock),
}

impl RawLock {
    pub fn new(config: LockConfig) -> Self {
        match config.kind {
            LockKind::Ticket => RawLock::Ticket(TicketLock::with_max_spin(config.max_spin)),
            LockKind::Plain => RawLock::Plain(PlainLock::new()),
        }
    }

    pub fn kind(&self) -> LockKind {
        match self {
            RawLock::Ticket(_) => LockKind::Ticket,
            RawLock::Plain(_) => LockKind::Plain,
        }
    }

    #[inline]
    fn acquire_read(&self) -> Ticket {
        match self {
            RawLock::Ticket(lock) => lock.acquire_read(),
            RawLock::Plain(lock) => lock.acquire_read(),
        }
    }

    /// # Safety
    ///
    /// `ticket` must come from `acquire_read` on this lock.
    #[inline]
    unsafe fn release_read(&self, ticket: Ticket) {
        match self {
            RawLock::Ticket(lock) => lock.release_read(ticket),
            // SAFETY: forwarded from the caller.
            RawLock::Plain(lock) => unsafe { lock.release_read(ticket) },
        }
    }

    #[inline]
    fn acquire_write(&self) -> Ticket {
        match self {
            RawLock::Ticket(lock) => lock.acquire_write(),
            RawLock::Plain(lock) => lock.acquire_write(),
        }
    }

    /// # Safety
    ///
    /// `ticket` must come from `acquire_write` on this lock.
    #[inline]
    unsafe fn release_write(&self, ticket: Ticket) {
        match self {
            RawLock::Ticket(lock) => lock.release_write(ticket),
            // SAFETY: forwarded from the caller.
            RawLock::Plain(lock) => unsafe { lock.release_write(ticket) },
        }
    }
}

/// A value protected by a non-reentrant read/write lock.
///
/// Acquiring a guard while the same thread already holds one on this lock
/// deadlocks.
pub struct ShardLock<T> {
    raw: RawLock,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialised by `raw`, exactly like `std::sync::RwLock`.
unsafe impl<T: Send> Send for ShardLock<T> {}
unsafe impl<T: Send + Sync> Sync for ShardLock<T> {}

impl<T> ShardLock<T> {
    pub fn new(value: T, config: LockConfig) -> Self {
        Self {
            raw: RawLock::new(config),
            data: UnsafeCell::new(value),
        }
    }

    pub fn read(&self) -> ShardReadGuard<'_, T> {
        let ticket = self.raw.acquire_read();
        ShardReadGuard {
            lock: self,
            ticket: Some(ticket),
        }
    }

    pub fn write(&self) -> ShardWriteGuard<'_, T> {
        let ticket = self.raw.acquire_write();
        ShardWriteGuard {
            lock: self,
            ticket: Some(ticket),
        }
    }

    pub fn kind(&self) -> LockKind {
        self.raw.kind()
    }

}

impl<T: fmt::Debug> fmt::Debug for ShardLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardLock").field("raw", &self.raw).finish()
    }
}

pub struct ShardReadGuard<'a, T> {
    lock: &'a ShardLock<T>,
    ticket: Option<Ticket>,
}

impl<T> ShardReadGuard<'_, T> {
    /// Admission ticket of this hold (`u64::MAX` for plain locks).
    pub fn ticket(&self) -> u64 {
        self.ticket.as_ref().map_or(Ticket::UNORDERED, Ticket::number)
    }
}

impl<T> Deref for ShardReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: a shared hold is active for the guard's lifetime.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for ShardReadGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            // SAFETY: the ticket was produced by `acquire_read` on this lock.
            unsafe { self.lock.raw.release_read(ticket) }
        }
    }
}

pub struct ShardWriteGuard<'a, T> {
    lock: &'a ShardLock<T>,
    ticket: Option<Ticket>,
}

impl<T> ShardWriteGuard<'_, T> {
    /// Admission ticket of this hold (`u64::MAX` for plain locks).
    pub fn ticket(&self) -> u64 {
        self.ticket.as_ref().map_or(Ticket::UNORDERED, Ticket::number)
    }
}

impl<T> Deref for ShardWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: an exclusive hold is active for the guard's lifetime.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for ShardWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: an exclusive hold is active for the guard's lifetime.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for ShardWriteGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            // SAFETY: the ticket was produced by `acquire_write` on this lock.
            unsafe { self.lock.raw.release_write(ticket) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lock_kind_parse() {
        assert_eq!("ticket".parse::<LockKind>(), Ok(LockKind::Ticket));
        assert_eq!("PLAIN".parse::<LockKind>(), Ok(LockKind::Plain));
        assert!("spin".parse::<LockKind>().is_err());
    }

    #[test]
    fn test_guards_expose_tickets() {
        let lock = ShardLock::new(0u32, LockConfig::default());
        {
            let r = lock.read();
            assert_eq!(r.ticket(), 0);
        }
        {
            let mut w = lock.write();
            assert_eq!(w.ticket(), 1);
            *w += 5;
        }
        assert_eq!(*lock.read(), 5);
    }

    #[test]
    fn test_plain_variant() {
        let lock = ShardLock::new(Vec::new(), LockConfig::plain());
        assert_eq!(lock.kind(), LockKind::Plain);
        lock.write().push(1);
        assert_eq!(lock.read().ticket(), u64::MAX);
        assert_eq!(*lock.read(), vec![1]);
    }

    #[test]
    fn test_concurrent_increments() {
        for config in [LockConfig::default(), LockConfig::plain()] {
            let lock = Arc::new(ShardLock::new(0u64, config));
            let mut handles = vec![];

            for _ in 0..8 {
                let lock = Arc::clone(&lock);
                handles.push(thread::spawn(move || {
                    for _ in 0..1_000 {
                        *lock.write() += 1;
                    }
                }));
            }

            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(*lock.read(), 8_000);
        }
    }
}
