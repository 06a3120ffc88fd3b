//! Bin resize and bucket multiplication, alone and under live traffic.

use bytes::Bytes;
use flashgrid::config::{ConfigSnapshot, BIN_COUNT_MIN, BUCKET_COUNT};
use flashgrid::objects::BlobObject;
use flashgrid::storage::{Bucket, Cache, CachedObject, Key, ResizePacing};
use flashgrid::sync::LockConfig;
use flashgrid::Result;
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

fn blob_of_key(key: &Key) -> Result<Box<dyn CachedObject>> {
    let mut blob = BlobObject::new(None);
    blob.write_only(key.bytes())?;
    Ok(Box::new(blob))
}

fn value_in_bucket(bucket: &Bucket, key: &Key) -> Option<Bytes> {
    let entry = bucket.get(key)?;
    let object = entry.read();
    object.read_only(&Bytes::new()).unwrap()
}

fn cache_with_buckets(buckets: usize) -> Cache {
    Cache::new(
        "resharding",
        ConfigSnapshot::new()
            .with(BUCKET_COUNT, buckets)
            .with(BIN_COUNT_MIN, 11),
    )
    .unwrap()
}

#[test]
fn test_bin_resize_keeps_ten_thousand_keys() {
    let bucket = Bucket::new(11, LockConfig::default());
    let keys: Vec<Key> = (0..10_000)
        .map(|i| Key::from(format!("key-{}", i)))
        .collect();
    for key in &keys {
        bucket.get_entry(key, blob_of_key).unwrap();
    }

    bucket.resize(101, &ResizePacing::unpaced()).unwrap();

    assert_eq!(bucket.bin_count(), 101);
    assert_eq!(bucket.item_count(), 10_000);
    for key in &keys {
        assert_eq!(value_in_bucket(&bucket, key), Some(key.bytes().clone()));
    }
}

#[test]
fn test_multiply_moves_keys_by_multiples_of_old_count() {
    let cache = cache_with_buckets(4);
    let mut before = HashMap::new();
    for i in 0..1_000 {
        let key = Key::from(format!("key-{}", i));
        cache.write_only(&key, key.bytes()).unwrap();
        before.insert(key.clone(), key.bucket_index(4));
    }
    for index in 0..4 {
        for key in cache.bucket(index).unwrap().keys() {
            assert_eq!(before[&key], index);
        }
    }

    cache.multiply_bucket_count(3).unwrap();
    assert_eq!(cache.bucket_count(), 12);

    let mut seen = 0;
    for index in 0..12 {
        for key in cache.bucket(index).unwrap().keys() {
            let old = before[&key];
            assert!(
                (0..3).any(|m| index == old + m * 4),
                "{} moved from bucket {} to {}",
                key,
                old,
                index
            );
            seen += 1;
        }
    }
    assert_eq!(seen, 1_000);
}

#[test]
fn test_reads_never_miss_during_multiply() {
    let cache = Arc::new(cache_with_buckets(2));
    let keys: Vec<Key> = (0..5_000)
        .map(|i| Key::from(format!("key-{}", i)))
        .collect();
    for key in &keys {
        cache.write_only(key, key.bytes()).unwrap();
    }

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let keys = keys.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut misses = 0;
                while !done.load(Ordering::SeqCst) {
                    for key in &keys {
                        if cache.read_only(key, &Bytes::new()).unwrap().is_none() {
                            misses += 1;
                        }
                    }
                }
                misses
            })
        })
        .collect();

    cache.multiply_bucket_count(2).unwrap();
    cache.multiply_bucket_count(3).unwrap();
    done.store(true, Ordering::SeqCst);

    for reader in readers {
        assert_eq!(reader.join().unwrap(), 0);
    }
    assert_eq!(cache.bucket_count(), 12);
    assert_eq!(cache.item_count(), 5_000);
}

#[test]
fn test_writes_during_bin_resize_are_not_lost() {
    let bucket = Arc::new(Bucket::new(11, LockConfig::default()));
    for i in 0..2_000 {
        bucket
            .get_entry(&Key::from(format!("old-{}", i)), blob_of_key)
            .unwrap();
    }

    let writer = {
        let bucket = Arc::clone(&bucket);
        thread::spawn(move || {
            for i in 0..2_000 {
                bucket
                    .get_entry(&Key::from(format!("new-{}", i)), blob_of_key)
                    .unwrap();
            }
        })
    };
    for count in [101, 37, 211] {
        bucket.resize(count, &ResizePacing::unpaced()).unwrap();
    }
    writer.join().unwrap();

    let keys: HashSet<Key> = bucket.keys().into_iter().collect();
    assert_eq!(keys.len(), 4_000);
    assert_eq!(bucket.item_count(), 4_000);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_resize_conserves_entries(
        raw_keys in prop::collection::hash_set("[a-z0-9]{1,12}", 0..400),
        counts in prop::collection::vec(1usize..200, 1..5),
    ) {
        let bucket = Bucket::new(11, LockConfig::default());
        for raw in &raw_keys {
            bucket.get_entry(&Key::from(raw.as_str()), blob_of_key).unwrap();
        }

        for count in counts {
            bucket.resize(count, &ResizePacing::unpaced()).unwrap();
            prop_assert_eq!(bucket.item_count(), raw_keys.len());
        }

        let after: HashSet<String> = bucket
            .keys()
            .iter()
            .map(|k| String::from_utf8_lossy(k.bytes()).into_owned())
            .collect();
        prop_assert_eq!(&after, &raw_keys);
        for raw in &raw_keys {
            prop_assert!(bucket.get(&Key::from(raw.as_str())).is_some());
        }
    }

    #[test]
    fn prop_multiplication_preserves_bucket_affinity(
        bytes in prop::collection::vec(any::<u8>(), 0..64),
        old_count in 1usize..64,
        factor in 2usize..8,
    ) {
        let key = Key::new(bytes);
        let old = key.bucket_index(old_count);
        let new = key.bucket_index(old_count * factor);
        prop_assert_eq!(new % old_count, old);
    }
}
