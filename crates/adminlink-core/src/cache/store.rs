use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::DEFAULT_CACHE_TTL_MS;
use crate::store::KvStore;

/// Segment appended to the storage namespace for cache entries.
const CACHE_SEGMENT: &str = "cache.";

/// How long an entry stays readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Expires once this much time has passed since the write.
    /// A zero duration expires as soon as the clock moves.
    After(StdDuration),
    /// Never expires.
    Never,
}

impl Ttl {
    pub fn millis(ms: u64) -> Self {
        Ttl::After(StdDuration::from_millis(ms))
    }

    /// Absolute expiry for a write at `now`; `None` means never.
    /// Finite lifetimes past chrono's range saturate to its latest instant.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Ttl::Never => None,
            Ttl::After(ttl) => Some(
                Duration::from_std(*ttl)
                    .ok()
                    .and_then(|ttl| now.checked_add_signed(ttl))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            ),
        }
    }
}

impl Default for Ttl {
    fn default() -> Self {
        Ttl::millis(DEFAULT_CACHE_TTL_MS)
    }
}

/// Persisted envelope. Timestamps are epoch milliseconds on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub data: Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub stored_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now > at).unwrap_or(false)
    }
}

/// A live cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub data: Value,
    /// When the entry was written
    pub timestamp: DateTime<Utc>,
}

impl CacheHit {
    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_minutes()
    }

    pub fn age_display(&self, now: DateTime<Utc>) -> String {
        let minutes = self.age_minutes(now);
        if minutes < 1 {
            // Also covers clock skew (negative ages)
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            let remaining_mins = minutes % 60;
            if remaining_mins >= 30 {
                // Round up: 1h 30m+ becomes 2h
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            let remaining_hours = (minutes % 1440) / 60;
            if remaining_hours >= 12 {
                // Round up: 1d 12h+ becomes 2d
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

/// Namespaced TTL cache over the key-value store.
///
/// Expired entries are evicted lazily when read; nothing sweeps storage in
/// the background, so an expired entry that is never read again stays put.
/// Invalidation after mutations is the caller's job (`remove_cache`).
#[derive(Clone)]
pub struct CacheStore {
    store: KvStore,
    prefix: String,
    clock: Arc<dyn Clock>,
    default_ttl: Ttl,
}

impl CacheStore {
    pub fn new(store: KvStore, namespace: &str) -> Self {
        Self {
            store,
            prefix: format!("{}{}", namespace, CACHE_SEGMENT),
            clock: Arc::new(SystemClock),
            default_ttl: Ttl::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Ttl) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn default_ttl(&self) -> Ttl {
        self.default_ttl
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Storage key for a logical cache key.
    pub fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub fn read_cache(&self, key: &str) -> Option<CacheHit> {
        let storage_key = self.storage_key(key);
        let raw = self.store.get(&storage_key)?;

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = key, error = %e, "Discarding unreadable cache entry");
                self.store.remove(&storage_key);
                return None;
            }
        };

        if entry.is_expired(self.clock.now()) {
            debug!(key = key, "Cache entry expired, evicting");
            self.store.remove(&storage_key);
            return None;
        }

        Some(CacheHit {
            data: entry.data,
            timestamp: entry.stored_at,
        })
    }

    /// Overwrites any existing entry.
    pub fn write_cache(&self, key: &str, data: &Value, ttl: Ttl) {
        let now = self.clock.now();
        let entry = CacheEntry {
            data: data.clone(),
            stored_at: now,
            expires_at: ttl.expires_at(now),
        };
        match serde_json::to_string(&entry) {
            Ok(contents) => {
                self.store.set(&self.storage_key(key), &contents);
                debug!(key = key, ttl = ?ttl, "Cache entry written");
            }
            Err(e) => warn!(key = key, error = %e, "Failed to serialize cache entry"),
        }
    }

    pub fn write_cache_default(&self, key: &str, data: &Value) {
        self.write_cache(key, data, self.default_ttl);
    }

    pub fn remove_cache(&self, key: &str) {
        self.store.remove(&self.storage_key(key));
    }

    /// Typed read. A stored value that no longer decodes as `T` is a miss.
    pub fn read_typed<T: DeserializeOwned>(&self, key: &str) -> Option<(T, DateTime<Utc>)> {
        let hit = self.read_cache(key)?;
        match serde_json::from_value(hit.data) {
            Ok(value) => Some((value, hit.timestamp)),
            Err(e) => {
                debug!(key = key, error = %e, "Cached value has unexpected shape");
                None
            }
        }
    }

    pub fn write_typed<T: Serialize>(&self, key: &str, value: &T, ttl: Ttl) {
        match serde_json::to_value(value) {
            Ok(data) => self.write_cache(key, &data, ttl),
            Err(e) => warn!(key = key, error = %e, "Failed to serialize cache value"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
