//! Cache entry with TTL and access metadata.

use std::time::{Duration, Instant};

/// A single cached value and the metadata used for expiry and LRU eviction.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// The stored value.
    pub value: T,
    /// When the entry was written.
    pub created_at: Instant,
    /// How long the entry stays visible after `created_at`.
    pub ttl: Duration,
    /// Number of successful reads.
    pub access_count: u64,
    /// Last write or successful read.
    pub last_accessed_at: Instant,
    /// Cache-wide sequence number of the last touch; breaks `last_accessed_at` ties.
    pub(crate) access_seq: u64,
}

impl<T> CacheEntry<T> {
    pub(crate) fn new(value: T, ttl: Duration, now: Instant, seq: u64) -> Self {
        Self {
            value,
            created_at: now,
            ttl,
            access_count: 0,
            last_accessed_at: now,
            access_seq: seq,
        }
    }

    /// Returns whether the entry is past its TTL at `now`.
    ///
    /// An entry is still live when exactly `ttl` has elapsed.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }

    /// Time left before expiry, zero once expired.
    #[must_use]
    pub fn remaining_ttl(&self, now: Instant) -> Duration {
        self.ttl
            .saturating_sub(now.saturating_duration_since(self.created_at))
    }

    pub(crate) fn touch(&mut self, now: Instant, seq: u64) {
        self.access_count += 1;
        self.last_accessed_at = now;
        self.access_seq = seq;
    }

    /// Ordering key for LRU eviction; the smallest key is evicted first.
    pub(crate) fn lru_key(&self) -> (Instant, u64) {
        (self.last_accessed_at, self.access_seq)
    }
}
