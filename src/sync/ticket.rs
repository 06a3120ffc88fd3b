//! Ticket Read/Write Lock
//!
//! A non-reentrant read/write lock tuned for very short critical sections,
//! such as a bin's map lookup or a single object callback.
//!
//! ## Admission
//!
//! ```text
//!   dispenser ──> ticket 7 ──┐
//!                            ▼
//!   next == 7 ? ── no ──> spin / park
//!        │
//!       yes
//!        ▼
//!   reader: wait writers == 0          writer: wait readers == 0 && writers == 0
//!        │                                  │
//!        ▼                                  ▼
//!   readers += 1, next = 8             writers += 1, next = 8
//! ```
//!
//! `next` is advanced as soon as a holder is *admitted*, not when it releases.
//! A run of readers therefore overlaps freely while every acquirer, reader or
//! writer, is still served in strict ticket order. That ordering is what gives
//! starvation freedom without a queue or any allocation.
//!
//! ## Blocking
//!
//! Waiters busy-spin for up to `max_spin`, then park on a condition variable.
//! Every release and every admission broadcasts to parked waiters; which waiter
//! wakes first does not matter because each one re-checks its own ticket.
//! With `max_spin = None` waiters spin (yielding) forever and never park.
//!
//! ## Reentrancy
//!
//! The lock is NOT reentrant. A thread that already holds it (for reading or
//! writing) and acquires it again draws a fresh ticket that can only be
//! admitted after its own earlier hold is released, so it deadlocks. This is a
//! precondition on callers and is not detected at runtime.

use parking_lot::{Condvar, Mutex};
use std::hint;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Spin iterations between two checks of the spin deadline.
const SPIN_BATCH: u32 = 64;

/// Proof of admission handed out by [`TicketLock::acquire_read`] and
/// [`TicketLock::acquire_write`].
///
/// A ticket is consumed by the matching release call, so it cannot be
/// released twice.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[must_use = "a ticket must be handed back to the lock it came from"]
pub struct Ticket(u64);

impl Ticket {
    /// Ticket handed out by locks that do not keep an admission order.
    pub(crate) const UNORDERED: u64 = u64::MAX;

    pub(crate) fn new(number: u64) -> Self {
        Self(number)
    }

    /// The position of this acquisition in the lock's admission order.
    pub fn number(&self) -> u64 {
        self.0
    }
}

/// The ticket-ordered read/write lock.
pub struct TicketLock {
    /// Next ticket to hand out
    dispenser: AtomicU64,
    /// Ticket currently allowed to be admitted
    next: AtomicU64,
    /// Number of admitted readers
    readers: AtomicUsize,
    /// Number of admitted writers (0 or 1)
    writers: AtomicUsize,
    /// Number of threads parked on `wakeup`
    parked: AtomicUsize,
    /// How long to spin before parking (`None` = never park)
    max_spin: Option<Duration>,
    gate: Mutex<()>,
    wakeup: Condvar,
}

impl std::fmt::Debug for TicketLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketLock")
            .field("dispenser", &self.dispenser.load(Ordering::Relaxed))
            .field("next", &self.next.load(Ordering::Relaxed))
            .field("readers", &self.readers.load(Ordering::Relaxed))
            .field("writers", &self.writers.load(Ordering::Relaxed))
            .field("max_spin", &self.max_spin)
            .finish()
    }
}

impl Default for TicketLock {
    fn default() -> Self {
        Self::new()
    }
}

impl TicketLock {
    /// Default busy-spin budget before a waiter parks.
    pub const DEFAULT_MAX_SPIN: Duration = Duration::from_micros(50);

    /// Creates a lock that spins for [`Self::DEFAULT_MAX_SPIN`] before parking.
    pub fn new() -> Self {
        Self::with_max_spin(Some(Self::DEFAULT_MAX_SPIN))
    }

    /// Creates a lock with an explicit spin budget. `None` spins forever.
    pub fn with_max_spin(max_spin: Option<Duration>) -> Self {
        Self {
            dispenser: AtomicU64::new(0),
            next: AtomicU64::new(0),
            readers: AtomicUsize::new(0),
            writers: AtomicUsize::new(0),
            parked: AtomicUsize::new(0),
            max_spin,
            gate: Mutex::new(()),
            wakeup: Condvar::new(),
        }
    }

    /// Acquires the lock for shared access.
    ///
    /// Deadlocks if the calling thread already holds this lock.
    pub fn acquire_read(&self) -> Ticket {
        let ticket = self.dispenser.fetch_add(1, Ordering::SeqCst);
        self.wait_until(|| {
            self.next.load(Ordering::SeqCst) == ticket && self.writers.load(Ordering::SeqCst) == 0
        });
        self.readers.fetch_add(1, Ordering::SeqCst);
        self.admit_next();
        Ticket(ticket)
    }

    /// Releases a shared hold.
    pub fn release_read(&self, ticket: Ticket) {
        debug_assert!(ticket.0 < self.dispenser.load(Ordering::Relaxed));
        let previous = self.readers.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "release_read without a reader");
        self.wake_parked();
    }

    /// Acquires the lock for exclusive access.
    ///
    /// Deadlocks if the calling thread already holds this lock.
    pub fn acquire_write(&self) -> Ticket {
        let ticket = self.dispenser.fetch_add(1, Ordering::SeqCst);
        self.wait_until(|| {
            self.next.load(Ordering::SeqCst) == ticket
                && self.readers.load(Ordering::SeqCst) == 0
                && self.writers.load(Ordering::SeqCst) == 0
        });
        self.writers.fetch_add(1, Ordering::SeqCst);
        self.admit_next();
        Ticket(ticket)
    }

    /// Releases an exclusive hold.
    pub fn release_write(&self, ticket: Ticket) {
        debug_assert!(ticket.0 < self.dispenser.load(Ordering::Relaxed));
        let previous = self.writers.fetch_sub(1, Ordering::SeqCst);
        debug_assert_eq!(previous, 1, "release_write without a writer");
        self.wake_parked();
    }

    /// Number of readers currently admitted.
    pub fn readers(&self) -> usize {
        self.readers.load(Ordering::SeqCst)
    }

    /// Number of writers currently admitted (0 or 1).
    pub fn writers(&self) -> usize {
        self.writers.load(Ordering::SeqCst)
    }

    /// Returns true if any reader or writer holds the lock.
    pub fn is_locked(&self) -> bool {
        self.readers() > 0 || self.writers() > 0
    }

    /// Number of tickets drawn so far.
    pub fn tickets_issued(&self) -> u64 {
        self.dispenser.load(Ordering::SeqCst)
    }

    /// Spin budget this lock was created with.
    pub fn max_spin(&self) -> Option<Duration> {
        self.max_spin
    }

    /// Lets the next ticket holder in. Only the admitted thread calls this,
    /// so a plain increment is enough.
    #[inline]
    fn admit_next(&self) {
        self.next.fetch_add(1, Ordering::SeqCst);
        self.wake_parked();
    }

    fn wait_until(&self, ready: impl Fn() -> bool) {
        if ready() {
            return;
        }

        let started = Instant::now();
        loop {
            for _ in 0..SPIN_BATCH {
                if ready() {
                    return;
                }
                hint::spin_loop();
            }

            match self.max_spin {
                None => thread::yield_now(),
                Some(limit) if started.elapsed() < limit => {}
                Some(_) => {
                    self.park_until(&ready);
                    return;
                }
            }
        }
    }

    fn park_until(&self, ready: &impl Fn() -> bool) {
        // Registering before the check pairs with the load in `wake_parked`:
        // either the releaser sees us parked, or we see its state change.
        self.parked.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.gate.lock();
        while !ready() {
            self.wakeup.wait(&mut gate);
        }
        drop(gate);
        self.parked.fetch_sub(1, Ordering::SeqCst);
    }

    #[inline]
    fn wake_parked(&self) {
        if self.parked.load(Ordering::SeqCst) > 0 {
            let _gate = self.gate.lock();
            self.wakeup.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn test_read_then_write() {
        let lock = TicketLock::new();

        let r = lock.acquire_read();
        assert_eq!(lock.readers(), 1);
        lock.release_read(r);

        let w = lock.acquire_write();
        assert_eq!(lock.writers(), 1);
        assert_eq!(w.number(), 1);
        lock.release_write(w);

        assert!(!lock.is_locked());
        assert_eq!(lock.tickets_issued(), 2);
    }

    #[test]
    fn test_readers_overlap() {
        let lock = TicketLock::new();

        let a = lock.acquire_read();
        let b = lock.acquire_read();
        assert_eq!(lock.readers(), 2);

        lock.release_read(a);
        lock.release_read(b);
        assert_eq!(lock.readers(), 0);
    }

    #[test]
    fn test_writer_waits_for_reader() {
        let lock = Arc::new(TicketLock::new());
        let admitted = Arc::new(AtomicBool::new(false));

        let reader = lock.acquire_read();

        let handle = {
            let lock = Arc::clone(&lock);
            let admitted = Arc::clone(&admitted);
            thread::spawn(move || {
                let w = lock.acquire_write();
                admitted.store(true, Ordering::SeqCst);
                lock.release_write(w);
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!admitted.load(Ordering::SeqCst));

        lock.release_read(reader);
        handle.join().unwrap();
        assert!(admitted.load(Ordering::SeqCst));
    }

    #[test]
    fn test_queued_writer_blocks_later_readers() {
        let lock = Arc::new(TicketLock::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = lock.acquire_read();

        let writer = {
            let lock = Arc::clone(&lock);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                let w = lock.acquire_write();
                order.lock().push("writer");
                lock.release_write(w);
            })
        };

        // Let the writer draw its ticket before the late reader does.
        while lock.tickets_issued() < 2 {
            thread::yield_now();
        }

        let late_reader = {
            let lock = Arc::clone(&lock);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                let r = lock.acquire_read();
                order.lock().push("reader");
                lock.release_read(r);
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(order.lock().is_empty());

        lock.release_read(first);
        writer.join().unwrap();
        late_reader.join().unwrap();

        assert_eq!(*order.lock(), vec!["writer", "reader"]);
    }

    #[test]
    fn test_parked_waiter_is_woken() {
        let lock = Arc::new(TicketLock::with_max_spin(Some(Duration::from_micros(1))));
        let w = lock.acquire_write();

        let handle = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                let r = lock.acquire_read();
                lock.release_read(r);
            })
        };

        // Long enough for the reader to exhaust its spin budget and park.
        thread::sleep(Duration::from_millis(50));
        lock.release_write(w);
        handle.join().unwrap();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_spin_forever_variant() {
        let lock = Arc::new(TicketLock::with_max_spin(None));
        let mut handles = vec![];

        for _ in 0..4 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for _ in 0..1_000 {
                    let w = lock.acquire_write();
                    lock.release_write(w);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(lock.tickets_issued(), 4_000);
    }
}
