//! Lock behaviour under contention: mutual exclusion and admission order.

use flashgrid::sync::{LockConfig, ShardLock, TicketLock};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

/// Tracks who is inside the critical section and counts overlaps.
#[derive(Default)]
struct Occupancy {
    readers: AtomicUsize,
    writers: AtomicUsize,
    violations: AtomicU64,
}

impl Occupancy {
    fn enter_read(&self) {
        self.readers.fetch_add(1, Ordering::SeqCst);
        if self.writers.load(Ordering::SeqCst) != 0 {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn leave_read(&self) {
        self.readers.fetch_sub(1, Ordering::SeqCst);
    }

    fn enter_write(&self) {
        let writers = self.writers.fetch_add(1, Ordering::SeqCst);
        if writers != 0 || self.readers.load(Ordering::SeqCst) != 0 {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn leave_write(&self) {
        self.writers.fetch_sub(1, Ordering::SeqCst);
    }
}

fn hammer(lock: Arc<TicketLock>, readers: usize, ops: usize) -> u64 {
    let occupancy = Arc::new(Occupancy::default());
    let barrier = Arc::new(Barrier::new(readers + 1));
    let mut handles = vec![];

    {
        let lock = Arc::clone(&lock);
        let occupancy = Arc::clone(&occupancy);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            for _ in 0..ops {
                let ticket = lock.acquire_write();
                occupancy.enter_write();
                occupancy.leave_write();
                lock.release_write(ticket);
            }
        }));
    }

    for _ in 0..readers {
        let lock = Arc::clone(&lock);
        let occupancy = Arc::clone(&occupancy);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            for _ in 0..ops {
                let ticket = lock.acquire_read();
                occupancy.enter_read();
                occupancy.leave_read();
                lock.release_read(ticket);
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(!lock.is_locked());
    occupancy.violations.load(Ordering::SeqCst)
}

#[test]
fn test_one_writer_four_readers_never_overlap() {
    let lock = Arc::new(TicketLock::new());
    assert_eq!(hammer(Arc::clone(&lock), 4, 1_000_000), 0);
    assert_eq!(lock.tickets_issued(), 5_000_000);
}

#[test]
fn test_spin_forever_variant_never_overlaps() {
    let lock = Arc::new(TicketLock::with_max_spin(None));
    assert_eq!(hammer(lock, 4, 100_000), 0);
}

#[test]
fn test_short_spin_parks_and_still_excludes() {
    let lock = Arc::new(TicketLock::with_max_spin(Some(Duration::from_nanos(1))));
    assert_eq!(hammer(lock, 4, 50_000), 0);
}

#[test]
fn test_writers_admitted_in_ticket_order() {
    let lock = Arc::new(TicketLock::new());
    let last_admitted = Arc::new(AtomicU64::new(0));
    let out_of_order = Arc::new(AtomicU64::new(0));
    let mut handles = vec![];

    for _ in 0..8 {
        let lock = Arc::clone(&lock);
        let last_admitted = Arc::clone(&last_admitted);
        let out_of_order = Arc::clone(&out_of_order);
        handles.push(thread::spawn(move || {
            for _ in 0..20_000 {
                let ticket = lock.acquire_write();
                // Exclusive: no other thread touches `last_admitted` right now.
                let previous = last_admitted.swap(ticket.number(), Ordering::SeqCst);
                if ticket.number() != 0 && ticket.number() <= previous {
                    out_of_order.fetch_add(1, Ordering::SeqCst);
                }
                lock.release_write(ticket);
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(out_of_order.load(Ordering::SeqCst), 0);
    assert_eq!(last_admitted.load(Ordering::SeqCst), 8 * 20_000 - 1);
}

#[test]
fn test_mixed_admissions_follow_ticket_order() {
    let lock = Arc::new(TicketLock::new());
    // Admissions recorded so far; every ticket records exactly once.
    let admitted = Arc::new(AtomicU64::new(0));
    // Highest writer ticket admitted, plus one (0 = none yet).
    let last_writer = Arc::new(AtomicU64::new(0));
    let out_of_order = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(6));
    let mut handles = vec![];

    for t in 0..6 {
        let lock = Arc::clone(&lock);
        let admitted = Arc::clone(&admitted);
        let last_writer = Arc::clone(&last_writer);
        let out_of_order = Arc::clone(&out_of_order);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            for i in 0..20_000 {
                if (t + i) % 3 == 0 {
                    let ticket = lock.acquire_write();
                    // Every earlier ticket has been admitted, no later one has.
                    if admitted.load(Ordering::SeqCst) != ticket.number() {
                        out_of_order.fetch_add(1, Ordering::SeqCst);
                    }
                    admitted.fetch_add(1, Ordering::SeqCst);
                    last_writer.store(ticket.number() + 1, Ordering::SeqCst);
                    lock.release_write(ticket);
                } else {
                    let ticket = lock.acquire_read();
                    // No writer holding a later ticket got in first.
                    if last_writer.load(Ordering::SeqCst) > ticket.number() {
                        out_of_order.fetch_add(1, Ordering::SeqCst);
                    }
                    admitted.fetch_add(1, Ordering::SeqCst);
                    lock.release_read(ticket);
                }
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(out_of_order.load(Ordering::SeqCst), 0);
    assert_eq!(admitted.load(Ordering::SeqCst), 6 * 20_000);
    assert_eq!(lock.tickets_issued(), 6 * 20_000);
    assert!(!lock.is_locked());
}

#[test]
fn test_shard_lock_counter_is_exact() {
    for config in [LockConfig::default(), LockConfig::plain()] {
        let counter = Arc::new(ShardLock::new(0u64, config));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        *counter.write() += 1;
                        let _ = *counter.read();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*counter.read(), 80_000, "lock kind {}", config.kind);
    }
}
