//! Response Cache
//!
//! Keyed store of previous handler replies with per-command TTL and a
//! global size bound. Eviction is by insertion age: when the bound is
//! exceeded the entry with the oldest `created_at` goes, regardless of
//! how recently it was read.
//!
//! Expired entries are never served by `get`. They stay readable through
//! `get_stale` until the background sweep or size eviction removes them,
//! which is what the timeout fallback relies on.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::registry::normalize_message;

pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Composite key: room, sender and normalized message
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub room: String,
    pub sender: String,
    pub message: String,
}

impl CacheKey {
    pub fn new(room: &str, sender: &str, message: &str) -> Self {
        Self {
            room: room.to_string(),
            sender: sender.to_string(),
            message: normalize_message(message),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.room, self.sender, self.message)
    }
}

/// Stored reply
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub command_id: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        age_between(self.created_at, now)
    }
}

/// A reply read back from the cache, with its age at lookup time
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub payload: String,
    pub age: Duration,
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate_percent: f64,
}

/// One line of the cache status report
#[derive(Debug, Clone, Serialize)]
pub struct CacheSnapshotEntry {
    pub command_id: String,
    pub key: String,
    pub age_secs: u64,
}

/// Point-in-time view of the cache for admin reporting
#[derive(Debug, Clone, Serialize)]
pub struct CacheSnapshot {
    pub stats: CacheStats,
    pub by_command: BTreeMap<String, usize>,
    pub avg_age_secs: f64,
    /// Newest first
    pub recent: Vec<CacheSnapshotEntry>,
}

#[derive(Debug, Default)]
struct Store {
    entries: HashMap<CacheKey, CacheEntry>,
    // (created_at, key) ordering gives oldest-first with a deterministic tie-break
    by_age: BTreeSet<(DateTime<Utc>, CacheKey)>,
}

impl Store {
    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.by_age.remove(&(entry.created_at, entry.key.clone()));
        Some(entry)
    }

    fn evict_oldest(&mut self) -> Option<CacheKey> {
        let (_, key) = self.by_age.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }
}

/// Response cache shared between requests and the background sweeper
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<RwLock<Store>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    max_entries: usize,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl ResponseCache {
    /// Create a cache holding at most `max_entries` replies (minimum 1)
    pub fn new(max_entries: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(Store::default())),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            max_entries: max_entries.max(1),
        }
    }

    /// Fresh lookup. Misses when absent, expired, or `ttl` is zero.
    pub fn get(&self, key: &CacheKey, ttl: Duration, now: DateTime<Utc>) -> Option<CacheHit> {
        let hit = if ttl.is_zero() {
            None
        } else {
            let store = self.store.read();
            store.entries.get(key).and_then(|entry| {
                let age = entry.age(now);
                (age < ttl).then(|| CacheHit {
                    payload: entry.payload.clone(),
                    age,
                })
            })
        };

        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Cache HIT: {} (ttl {}s)", key, ttl.as_secs());
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!("Cache MISS: {}", key);
        }
        hit
    }

    /// Lookup ignoring expiry. Only for the timeout fallback path.
    pub fn get_stale(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<CacheHit> {
        let store = self.store.read();
        store.entries.get(key).map(|entry| CacheHit {
            payload: entry.payload.clone(),
            age: entry.age(now),
        })
    }

    /// Insert or overwrite a reply, evicting the oldest entry if over the bound
    ///
    /// Returns the evicted key, if any.
    pub fn put(
        &self,
        key: CacheKey,
        command_id: &str,
        payload: &str,
        now: DateTime<Utc>,
    ) -> Option<CacheKey> {
        let mut store = self.store.write();

        store.remove(&key);
        store.by_age.insert((now, key.clone()));
        store.entries.insert(
            key.clone(),
            CacheEntry {
                key: key.clone(),
                command_id: command_id.to_string(),
                payload: payload.to_string(),
                created_at: now,
            },
        );
        debug!("Cache SET: {}", key);

        // Each put adds at most one entry, so one eviction restores the bound
        let evicted = if store.entries.len() > self.max_entries {
            store.evict_oldest()
        } else {
            None
        };
        if let Some(ref old) = evicted {
            debug!("Cache full, evicted oldest entry: {}", old);
        }

        debug_assert!(store.entries.len() <= self.max_entries);
        debug_assert_eq!(store.entries.len(), store.by_age.len());
        evicted
    }

    /// Remove every entry whose command TTL has elapsed
    pub fn sweep<F>(&self, now: DateTime<Utc>, ttl_of: F) -> usize
    where
        F: Fn(&str) -> Duration,
    {
        let mut store = self.store.write();
        let expired: Vec<CacheKey> = store
            .entries
            .values()
            .filter(|entry| entry.age(now) >= ttl_of(&entry.command_id))
            .map(|entry| entry.key.clone())
            .collect();

        for key in &expired {
            store.remove(key);
        }

        if !expired.is_empty() {
            debug!("Cache sweep removed {} expired entries", expired.len());
        }
        expired.len()
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.store.write().remove(key).is_some()
    }

    /// Drop all entries and reset hit/miss counters. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut store = self.store.write();
        let removed = store.entries.len();
        store.entries.clear();
        store.by_age.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        removed
    }

    pub fn len(&self) -> usize {
        self.store.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            entries: self.len(),
            max_entries: self.max_entries,
            hits,
            misses,
            hit_rate_percent: if total > 0 {
                (hits as f64 / total as f64) * 100.0
            } else {
                0.0
            },
        }
    }

    /// Snapshot for reporting, listing up to `recent` newest entries
    pub fn snapshot(&self, now: DateTime<Utc>, recent: usize) -> CacheSnapshot {
        let stats = self.stats();
        let store = self.store.read();

        let mut by_command = BTreeMap::new();
        let mut total_age = 0.0;
        for entry in store.entries.values() {
            *by_command.entry(entry.command_id.clone()).or_insert(0) += 1;
            total_age += entry.age(now).as_secs_f64();
        }

        let recent = store
            .by_age
            .iter()
            .rev()
            .take(recent)
            .filter_map(|(_, key)| store.entries.get(key))
            .map(|entry| CacheSnapshotEntry {
                command_id: entry.command_id.clone(),
                key: entry.key.to_string(),
                age_secs: entry.age(now).as_secs(),
            })
            .collect();

        CacheSnapshot {
            avg_age_secs: if store.entries.is_empty() {
                0.0
            } else {
                total_age / store.entries.len() as f64
            },
            stats,
            by_command,
            recent,
        }
    }
}

fn age_between(created_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    // Clock skew can put created_at in the future; treat that as brand new
    now.signed_duration_since(created_at)
        .to_std()
        .unwrap_or(Duration::ZERO)
}
