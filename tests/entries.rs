//! Entry lifecycle: single creation under races, eviction, soft flush spread.

use bytes::Bytes;
use flashgrid::config::{ConfigSnapshot, BUCKET_COUNT};
use flashgrid::error::ObjectError;
use flashgrid::objects::BlobObject;
use flashgrid::registry::Registry;
use flashgrid::storage::{
    now_ms, Bin, Cache, CachedObject, Key, MaintenanceRequest, ObjectFactory,
};
use flashgrid::sync::LockConfig;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn test_fifty_racing_creators_leave_one_entry() {
    let bin = Arc::new(Bin::new(LockConfig::default()));
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(50));

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let bin = Arc::clone(&bin);
            let calls = Arc::clone(&calls);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                bin.get_or_create(&Key::from("fresh"), |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(10));
                    Ok(Box::new(BlobObject::new(None)) as Box<dyn CachedObject>)
                })
                .unwrap()
            })
        })
        .collect();

    let entries: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(bin.len(), 1);
    assert!(calls.load(Ordering::SeqCst) >= 1);
    let stored = bin.get(&Key::from("fresh")).unwrap();
    assert!(entries.iter().all(|e| Arc::ptr_eq(e, &stored)));
}

#[test]
fn test_racing_writers_share_one_counter() {
    let cache = Arc::new(
        Cache::builder("race")
            .factory("counter")
            .config(ConfigSnapshot::new().with(BUCKET_COUNT, 2))
            .build()
            .unwrap(),
    );
    let barrier = Arc::new(Barrier::new(50));

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..100 {
                    cache
                        .write_only(&Key::from("hits"), &Bytes::from_static(b"1"))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(cache.item_count(), 1);
    assert_eq!(
        cache.read_only(&Key::from("hits"), &Bytes::new()).unwrap(),
        Some(Bytes::from("5000"))
    );
    assert_eq!(cache.metrics().creates, 1);
}

#[test]
fn test_deletable_entries_are_gone_after_maintenance() {
    let cache = Cache::new("evict", ConfigSnapshot::new()).unwrap();
    for i in 0..100 {
        cache
            .write_only(&Key::from(format!("key-{}", i)), &Bytes::from("v"))
            .unwrap();
    }
    // Mark every even key deletable from inside its own entry.
    for i in (0..100).step_by(2) {
        let entry = cache.get(&Key::from(format!("key-{}", i))).unwrap();
        entry.write().flush(10, 0);
    }

    let report = cache.do_maintenance(&MaintenanceRequest::new(now_ms(), 100));
    assert_eq!(report.removed, 50);
    assert_eq!(report.kept, 50);

    for i in 0..100 {
        let present = cache.get(&Key::from(format!("key-{}", i))).is_some();
        assert_eq!(present, i % 2 == 1, "key-{}", i);
    }

    // A second pass finds nothing left to remove.
    let report = cache.do_maintenance(&MaintenanceRequest::new(now_ms(), 100));
    assert_eq!(report.removed, 0);
    assert_eq!(report.kept, 50);
}

/// Records the flush deadline every object is asked to honour.
struct Recording {
    deadlines: Arc<Mutex<Vec<u64>>>,
}

impl CachedObject for Recording {
    fn class_name(&self) -> &str {
        "recording"
    }
    fn write_only(&mut self, _request: &Bytes) -> Result<(), ObjectError> {
        Ok(())
    }
    fn read_only(&self, _request: &Bytes) -> Result<Option<Bytes>, ObjectError> {
        Ok(None)
    }
    fn do_maintenance(&mut self, _now_ms: u64, _memory_level: u8) -> Result<(), ObjectError> {
        Ok(())
    }
    fn can_delete(&self) -> bool {
        false
    }
    fn flush(&mut self, _now_ms: u64, flush_at_ms: u64) {
        self.deadlines.lock().push(flush_at_ms);
    }
    fn size(&self) -> u64 {
        0
    }
    fn upgrade_from(&mut self, _old: &dyn CachedObject) -> Result<(), ObjectError> {
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct RecordingFactory {
    deadlines: Arc<Mutex<Vec<u64>>>,
}

impl ObjectFactory for RecordingFactory {
    fn class_name(&self) -> &str {
        "recording"
    }
    fn create_object(&self) -> Result<Option<Box<dyn CachedObject>>, ObjectError> {
        Ok(Some(Box::new(Recording {
            deadlines: Arc::clone(&self.deadlines),
        })))
    }
}

#[test]
fn test_soft_flush_spreads_deadlines_uniformly() {
    let deadlines = Arc::new(Mutex::new(Vec::new()));
    let registry = Arc::new(Registry::new());
    {
        let deadlines = Arc::clone(&deadlines);
        registry.register_factory("recording", move |_| {
            Ok(Arc::new(RecordingFactory {
                deadlines: Arc::clone(&deadlines),
            }) as Arc<dyn ObjectFactory>)
        });
    }

    let cache = Cache::builder("flush")
        .registry(registry)
        .factory("recording")
        .config(ConfigSnapshot::new().with(BUCKET_COUNT, 1))
        .build()
        .unwrap();
    for i in 0..100 {
        cache
            .write_only(&Key::from(format!("item-{}", i)), &Bytes::new())
            .unwrap();
    }

    let before = now_ms();
    cache.flush(1_000);
    let after = now_ms();

    let mut deadlines = deadlines.lock().clone();
    assert_eq!(deadlines.len(), 100);
    deadlines.sort_unstable();

    let start = deadlines[0];
    assert!(start >= before && start <= after);
    // Item i of 100 over 1000ms is predicted at start + 10 * i.
    for (i, deadline) in deadlines.iter().enumerate() {
        let predicted = start + 10 * i as u64;
        assert!(
            deadline.abs_diff(predicted) <= 10,
            "item {} flushed at +{}ms, predicted +{}ms",
            i,
            deadline - start,
            predicted - start
        );
    }
    assert!(deadlines[99] < start + 1_000);
}
