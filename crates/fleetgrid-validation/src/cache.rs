//! Availability cache with TTL expiration.
//!
//! Keyed by `team/machine`. Entries older than the TTL are never returned;
//! they are removed on lookup and counted as expirations. Times come from
//! `tokio::time::Instant` so a paused test clock drives expiry.
//!
//! The cache is **not internally synchronized**. The exclusivity checker
//! wraps it in a `Mutex` and never holds the lock across an await.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use fleet_core::{Assignment, ValidationSettings};

/// Cache and remote-check timings.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Time-to-live for cache entries (default: 30 seconds).
    pub ttl: Duration,
    /// Ceiling on a remote availability check (default: 5 seconds).
    pub availability_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            availability_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&ValidationSettings> for CacheConfig {
    fn from(settings: &ValidationSettings) -> Self {
        Self {
            ttl: settings.cache_ttl(),
            availability_timeout: settings.availability_timeout(),
        }
    }
}

/// What the service last said about a machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAvailability {
    pub available: bool,
    /// The conflicting assignment when unavailable.
    pub conflict: Option<Assignment>,
}

struct CacheEntry {
    value: CachedAvailability,
    inserted_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() >= ttl
    }
}

/// Accumulated cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
}

pub struct ValidationCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
    stats: CacheStats,
}

impl ValidationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            stats: CacheStats::default(),
        }
    }

    pub fn key(team: &str, machine: &str) -> String {
        format!("{team}/{machine}")
    }

    /// Look up a fresh entry. Expired entries are removed eagerly.
    pub fn get(&mut self, key: &str) -> Option<CachedAvailability> {
        match self.entries.get(key) {
            Some(entry) if entry.is_expired(self.ttl) => {
                self.entries.remove(key);
                self.stats.expirations += 1;
                self.stats.misses += 1;
                debug!(key, cache_misses = self.stats.misses, "validation cache miss (expired)");
                None
            }
            Some(entry) => {
                self.stats.hits += 1;
                debug!(key, cache_hits = self.stats.hits, "validation cache hit");
                Some(entry.value.clone())
            }
            None => {
                self.stats.misses += 1;
                debug!(key, cache_misses = self.stats.misses, "validation cache miss");
                None
            }
        }
    }

    /// Write through a resolved answer. Last write wins.
    pub fn insert(&mut self, key: String, value: CachedAvailability) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
