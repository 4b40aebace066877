//! Response cache with per-entry TTL and LRU eviction.
//!
//! [`ResponseCache`] is a plain `&mut self` structure. The owner decides how
//! to share it; [`OptimizedClient`](crate::client::OptimizedClient) keeps it
//! behind a `std::sync::Mutex` that is never held across an `.await`.
//!
//! # Expiry
//!
//! An entry is visible while `now - created_at <= ttl`. Expired entries are
//! purged lazily by [`get`](ResponseCache::get) and [`has`](ResponseCache::has),
//! and in bulk by [`cleanup`](ResponseCache::cleanup), which
//! [`spawn_cleanup_task`] calls on an interval.
//!
//! # Eviction
//!
//! Inserting a new key into a full cache evicts exactly one entry: the one
//! with the oldest `last_accessed_at`. Equal timestamps are ordered by a
//! cache-wide touch counter, so the earliest-touched entry goes first.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use jobdl_core::cache::ResponseCache;
//!
//! let mut cache = ResponseCache::new(2, Duration::from_secs(30));
//! cache.set("job:1:status", "pending", None);
//! cache.set("job:2:status", "completed", None);
//! assert_eq!(cache.get("job:1:status"), Some("pending"));
//!
//! // job:2 is now least recently used and is evicted.
//! cache.set("job:3:status", "failed", None);
//! assert!(!cache.has("job:2:status"));
//! assert_eq!(cache.len(), 2);
//! ```

mod cleanup;
mod entry;

pub use cleanup::spawn_cleanup_task;
pub use entry::CacheEntry;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, trace};

use crate::clock::{SharedClock, SystemClock};

/// Snapshot of cache counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Live plus not-yet-purged entries.
    pub size: usize,
    /// Configured capacity.
    pub max_size: usize,
    /// Reads that returned a value.
    pub hits: u64,
    /// Reads that found nothing or an expired entry.
    pub misses: u64,
    /// Entries removed to make room.
    pub evictions: u64,
    /// Entries removed because their TTL elapsed.
    pub expirations: u64,
    /// `hits / (hits + misses)`, 0.0 before the first read.
    pub hit_rate: f64,
}

/// Key/value cache with TTL expiry and LRU eviction.
#[derive(Debug)]
pub struct ResponseCache<T> {
    entries: HashMap<String, CacheEntry<T>>,
    max_size: usize,
    default_ttl: Duration,
    clock: SharedClock,
    next_seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<T: Clone> ResponseCache<T> {
    /// Creates a cache on the system clock.
    ///
    /// A `max_size` of zero is raised to one.
    #[must_use]
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self::with_clock(max_size, default_ttl, Arc::new(SystemClock))
    }

    /// Creates a cache reading time from `clock`.
    #[must_use]
    pub fn with_clock(max_size: usize, default_ttl: Duration, clock: SharedClock) -> Self {
        Self {
            entries: HashMap::new(),
            max_size: max_size.max(1),
            default_ttl,
            clock,
            next_seq: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    /// Stores `value` under `key`, replacing any previous entry and its metadata.
    ///
    /// `ttl` defaults to the cache's default TTL. Inserting a new key into a
    /// full cache first evicts the least recently accessed entry.
    pub fn set(&mut self, key: impl Into<String>, value: T, ttl: Option<Duration>) {
        let key = key.into();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_size {
            self.evict_lru();
        }

        let now = self.clock.now();
        let seq = self.bump_seq();
        let ttl = ttl.unwrap_or(self.default_ttl);
        trace!(key = %key, ttl_ms = ttl.as_millis(), "cache set");
        self.entries
            .insert(key, CacheEntry::new(value, ttl, now, seq));
    }

    /// Returns the live value for `key`, recording the access.
    ///
    /// An expired entry is removed and reported as absent.
    pub fn get(&mut self, key: &str) -> Option<T> {
        let now = self.clock.now();
        let expired = match self.entries.get(key) {
            None => {
                self.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            self.entries.remove(key);
            self.expirations += 1;
            self.misses += 1;
            trace!(key, "cache entry expired");
            return None;
        }

        let seq = self.bump_seq();
        let entry = self.entries.get_mut(key)?;
        entry.touch(now, seq);
        self.hits += 1;
        Some(entry.value.clone())
    }

    /// Returns whether a live entry exists for `key`.
    ///
    /// Purges the entry if it has expired; access metadata is left untouched.
    pub fn has(&mut self, key: &str) -> bool {
        let now = self.clock.now();
        match self.entries.get(key) {
            None => false,
            Some(entry) if entry.is_expired(now) => {
                self.entries.remove(key);
                self.expirations += 1;
                false
            }
            Some(_) => true,
        }
    }

    /// Removes `key`. Returns whether an entry was present.
    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Removes every entry. Counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Removes every key containing `pattern`. Returns the number removed.
    pub fn invalidate(&mut self, pattern: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.contains(pattern));
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(pattern, removed, "invalidated cache entries");
        }
        removed
    }

    /// Removes every expired entry. Returns the number removed.
    pub fn cleanup(&mut self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - self.entries.len();
        self.expirations += removed as u64;
        removed
    }

    /// Number of stored entries, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Read-only view of an entry's metadata, without touching it.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<&CacheEntry<T>> {
        self.entries.get(key)
    }

    /// Returns a snapshot of the cache counters.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        CacheStats {
            size: self.entries.len(),
            max_size: self.max_size,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            expirations: self.expirations,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.hits as f64 / lookups as f64
            },
        }
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.lru_key())
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.evictions += 1;
            debug!(key = %key, "evicted least recently used cache entry");
        }
    }

    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}
