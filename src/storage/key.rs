//! Keys and routing hashes.

use bytes::Bytes;
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};

/// An immutable raw key with its routing hashes computed once.
///
/// Equality and `Hash` use the raw bytes only. The routing hashes select a
/// bucket (`hash_for_bucket % bucket_count`) and a bin inside that bucket
/// (`hash_for_bin % bin_count`); they come from different halves of one
/// 64-bit hash so bucket and bin placement are independent.
#[derive(Clone)]
pub struct Key {
    bytes: Bytes,
    hash_for_bin: u32,
    hash_for_bucket: u32,
}

impl Key {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        let hash = hasher.finish();

        Self {
            bytes,
            hash_for_bin: hash as u32,
            hash_for_bucket: (hash >> 32) as u32,
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn hash_for_bin(&self) -> u32 {
        self.hash_for_bin
    }

    pub fn hash_for_bucket(&self) -> u32 {
        self.hash_for_bucket
    }

    /// Bin index under `bin_count` bins.
    #[inline]
    pub fn bin_index(&self, bin_count: usize) -> usize {
        self.hash_for_bin as usize % bin_count
    }

    /// Bucket index under `bucket_count` buckets.
    #[inline]
    pub fn bucket_index(&self, bucket_count: usize) -> usize {
        self.hash_for_bucket as usize % bucket_count
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:?})", self.bytes)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.bytes))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::new(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::new(Bytes::from(s))
    }
}

impl From<Bytes> for Key {
    fn from(bytes: Bytes) -> Self {
        Key::new(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_by_bytes() {
        let a = Key::from("user:1");
        let b = Key::new(Bytes::from_static(b"user:1"));
        assert_eq!(a, b);
        assert_eq!(a.hash_for_bin(), b.hash_for_bin());
        assert_eq!(a.hash_for_bucket(), b.hash_for_bucket());
        assert_ne!(a, Key::from("user:2"));
    }

    #[test]
    fn test_indexes_are_in_range() {
        for i in 0..1_000 {
            let key = Key::from(format!("key-{}", i));
            assert!(key.bin_index(11) < 11);
            assert!(key.bucket_index(4) < 4);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Key::from("hello").to_string(), "hello");
    }
}
