//! Configuration
//!
//! Configuration reaches the cache as a [`ConfigSnapshot`]: an immutable
//! key/value view produced by whatever loads configuration files. A
//! [`ConfigHub`] holds the current snapshot and notifies subscribers when it
//! is replaced. The engine itself reads the typed [`CacheConfig`] derived
//! from a snapshot.
//!
//! ## Keys
//!
//! | key                           | default  | meaning                                  |
//! |-------------------------------|----------|------------------------------------------|
//! | `bucket.count`                | 4        | buckets created at initial load          |
//! | `bin.count.min`               | 11       | bins per bucket at creation              |
//! | `bin.item.max`                | 64       | items per bin before a bin resize        |
//! | `maintenance.period.ms`       | 300000   | maintenance period                       |
//! | `maintenance.jitter.pct`      | 10       | per-cache jitter applied to the period   |
//! | `size.max`                    | 0        | aggregate object size budget (0 = none)  |
//! | `eviction.level.step`         | 25       | pressure step of the eviction re-run     |
//! | `lock.kind`                   | ticket   | `ticket` or `plain`                      |
//! | `lock.max_spin.us`            | 50       | ticket lock spin budget (0 = forever)    |
//! | `resize.pause.occupancy.pct`  | 90       | occupancy above which resize pauses      |
//! | `resize.pause.ms`             | 5        | length of one resize pause               |

use crate::error::ConfigError;
use crate::sync::{LockConfig, LockKind};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::time::Duration;

pub const BUCKET_COUNT: &str = "bucket.count";
pub const BIN_COUNT_MIN: &str = "bin.count.min";
pub const BIN_ITEM_MAX: &str = "bin.item.max";
pub const MAINTENANCE_PERIOD_MS: &str = "maintenance.period.ms";
pub const MAINTENANCE_JITTER_PCT: &str = "maintenance.jitter.pct";
pub const SIZE_MAX: &str = "size.max";
pub const EVICTION_LEVEL_STEP: &str = "eviction.level.step";
pub const LOCK_KIND: &str = "lock.kind";
pub const LOCK_MAX_SPIN_US: &str = "lock.max_spin.us";
pub const RESIZE_PAUSE_OCCUPANCY_PCT: &str = "resize.pause.occupancy.pct";
pub const RESIZE_PAUSE_MS: &str = "resize.pause.ms";

/// Read-only key/value configuration view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSnapshot {
    values: BTreeMap<String, String>,
}

impl ConfigSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of this snapshot with `key` set to `value`.
    pub fn with(&self, key: impl Into<String>, value: impl ToString) -> Self {
        let mut values = self.values.clone();
        values.insert(key.into(), value.to_string());
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        self.get(key)
            .map(|raw| {
                raw.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
                    key: key.to_string(),
                    value: raw.to_string(),
                })
            })
            .transpose()
    }

    pub fn get_u64_or(&self, key: &str, default: u64) -> Result<u64, ConfigError> {
        Ok(self.get_u64(key)?.unwrap_or(default))
    }

    pub fn get_usize_or(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        let value = self.get_u64_or(key, default as u64)?;
        usize::try_from(value).map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    pub fn get_duration_ms_or(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self
            .get_u64(key)?
            .map(Duration::from_millis)
            .unwrap_or(default))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The full key/value map.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.values.clone()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConfigSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

type Subscriber = Box<dyn Fn(&ConfigSnapshot) + Send + Sync>;

/// Holds the current snapshot and notifies subscribers on change.
#[derive(Default)]
pub struct ConfigHub {
    current: RwLock<ConfigSnapshot>,
    subscribers: RwLock<Vec<Subscriber>>,
}

impl std::fmt::Debug for ConfigHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigHub")
            .field("keys", &self.current.read().len())
            .field("subscribers", &self.subscribers.read().len())
            .finish()
    }
}

impl ConfigHub {
    pub fn new(initial: ConfigSnapshot) -> Self {
        Self {
            current: RwLock::new(initial),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        self.current.read().clone()
    }

    /// Registers a callback invoked with every new snapshot.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&ConfigSnapshot) + Send + Sync + 'static,
    {
        self.subscribers.write().push(Box::new(callback));
    }

    /// Replaces the current snapshot and notifies subscribers.
    pub fn publish(&self, snapshot: ConfigSnapshot) {
        *self.current.write() = snapshot.clone();
        for subscriber in self.subscribers.read().iter() {
            subscriber(&snapshot);
        }
    }
}

/// Typed tunables of one cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub bucket_count: usize,
    pub bin_count_min: usize,
    pub bin_item_max: usize,
    pub maintenance_period: Duration,
    pub maintenance_jitter_pct: u8,
    /// Aggregate object size budget (0 = unbounded)
    pub size_max: u64,
    pub eviction_level_step: u8,
    pub lock: LockConfig,
    /// Memory occupancy above which a bin resize pauses between bins.
    /// Kept as an explicit tunable; there is no derived "right" value.
    pub resize_pause_occupancy_pct: u8,
    pub resize_pause: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            bucket_count: 4,
            bin_count_min: 11,
            bin_item_max: 64,
            maintenance_period: Duration::from_secs(300),
            maintenance_jitter_pct: 10,
            size_max: 0,
            eviction_level_step: 25,
            lock: LockConfig::default(),
            resize_pause_occupancy_pct: 90,
            resize_pause: Duration::from_millis(5),
        }
    }
}

impl CacheConfig {
    /// Builds a config from a snapshot, falling back to defaults for absent keys.
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let lock_kind = match snapshot.get(LOCK_KIND) {
            None => defaults.lock.kind,
            Some(raw) => raw.parse::<LockKind>().map_err(|_| ConfigError::Invalid {
                key: LOCK_KIND.to_string(),
                value: raw.to_string(),
            })?,
        };
        let max_spin = match snapshot.get_u64(LOCK_MAX_SPIN_US)? {
            None => defaults.lock.max_spin,
            Some(0) => None,
            Some(us) => Some(Duration::from_micros(us)),
        };

        let config = Self {
            bucket_count: snapshot.get_usize_or(BUCKET_COUNT, defaults.bucket_count)?,
            bin_count_min: snapshot.get_usize_or(BIN_COUNT_MIN, defaults.bin_count_min)?,
            bin_item_max: snapshot.get_usize_or(BIN_ITEM_MAX, defaults.bin_item_max)?,
            maintenance_period: snapshot
                .get_duration_ms_or(MAINTENANCE_PERIOD_MS, defaults.maintenance_period)?,
            maintenance_jitter_pct: percent(
                snapshot,
                MAINTENANCE_JITTER_PCT,
                defaults.maintenance_jitter_pct,
            )?,
            size_max: snapshot.get_u64_or(SIZE_MAX, defaults.size_max)?,
            eviction_level_step: percent(
                snapshot,
                EVICTION_LEVEL_STEP,
                defaults.eviction_level_step,
            )?,
            lock: LockConfig {
                kind: lock_kind,
                max_spin,
            },
            resize_pause_occupancy_pct: percent(
                snapshot,
                RESIZE_PAUSE_OCCUPANCY_PCT,
                defaults.resize_pause_occupancy_pct,
            )?,
            resize_pause: snapshot.get_duration_ms_or(RESIZE_PAUSE_MS, defaults.resize_pause)?,
        };

        at_least_one(BUCKET_COUNT, config.bucket_count)?;
        at_least_one(BIN_COUNT_MIN, config.bin_count_min)?;
        at_least_one(BIN_ITEM_MAX, config.bin_item_max)?;
        if config.eviction_level_step == 0 {
            return Err(ConfigError::OutOfRange {
                key: EVICTION_LEVEL_STEP.to_string(),
                value: 0,
                min: 1,
                max: 100,
            });
        }

        Ok(config)
    }
}

fn percent(snapshot: &ConfigSnapshot, key: &str, default: u8) -> Result<u8, ConfigError> {
    let value = snapshot.get_u64_or(key, u64::from(default))?;
    if value > 100 {
        return Err(ConfigError::OutOfRange {
            key: key.to_string(),
            value,
            min: 0,
            max: 100,
        });
    }
    Ok(value as u8)
}

fn at_least_one(key: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::OutOfRange {
            key: key.to_string(),
            value: 0,
            min: 1,
            max: u64::MAX,
        });
    }
    Ok(())
}
