//! Shared frame cache with LRU eviction, TTL expiry and hit/miss accounting
//!
//! Key: `(entity, frame_idx, variant)`. Values are `CacheValue`s holding an
//! `Arc`, so a published entry is never mutated in place: replacing a key
//! swaps the whole value and readers keep whatever `Arc` they cloned.
//!
//! Two bounds apply: an entry count (`lru` capacity) and an optional memory
//! budget tracked by `CacheManager`. Whichever trips first evicts from the
//! least-recently-used end.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, trace};
use lru::LruCache;
use serde::Serialize;

use crate::core::cache_man::CacheManager;
use crate::entities::{CacheValue, EntityId, FrameVariant};

/// Entry lifetime when none is given
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Frames kept warm ahead of the play position
pub const DEFAULT_PRELOAD_FRAMES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub entity: EntityId,
    pub frame_idx: i32,
    pub variant: FrameVariant,
}

impl CacheKey {
    pub fn new(entity: EntityId, frame_idx: i32, variant: FrameVariant) -> Self {
        Self { entity, frame_idx, variant }
    }
}

#[derive(Debug)]
struct CacheEntry {
    value: CacheValue,
    expires_at: Instant,
    size: usize,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Cache statistics for monitoring performance
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Number of values ever written
    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.hits() + self.misses()
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 { 0.0 } else { self.hits() as f64 / total as f64 }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.inserts.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the cache counters, for reporting
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub total_entries_cached: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
    pub memory_bytes: usize,
}

#[derive(Debug)]
pub struct FrameCache {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    manager: Arc<CacheManager>,
    stats: Arc<CacheStats>,
    default_ttl: Duration,
}

impl FrameCache {
    /// Create a cache holding at most `capacity` entries (min 1).
    pub fn new(capacity: usize, default_ttl: Duration, manager: Arc<CacheManager>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        debug!(
            "FrameCache created: capacity={}, ttl={}s",
            capacity,
            default_ttl.as_secs()
        );
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            manager,
            stats: Arc::new(CacheStats::new()),
            default_ttl,
        }
    }

    /// Default TTL, unbounded memory
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(capacity, DEFAULT_TTL, Arc::new(CacheManager::unbounded()))
    }

    /// Look up a live entry. Updates LRU order and hit/miss counters.
    ///
    /// An expired entry is dropped and counts as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let expired = match entries.get(key) {
            Some(entry) if entry.is_live(now) => {
                let value = entry.value.clone();
                self.stats.record_hit();
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        if expired && let Some(entry) = entries.pop(key) {
            self.manager.free_memory(entry.size);
            self.stats.record_expiration();
            trace!("Expired {}:{}:{}", key.entity, key.frame_idx, key.variant.as_str());
        }
        self.stats.record_miss();
        None
    }

    /// Presence check without touching LRU order or counters
    pub fn contains(&self, key: &CacheKey) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .peek(key)
            .is_some_and(|entry| entry.is_live(now))
    }

    /// Publish `value` under `key`, replacing any previous value.
    ///
    /// `ttl` of None uses the cache default.
    pub fn set(&self, key: CacheKey, value: CacheValue, ttl: Option<Duration>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.publish(&mut entries, key, value, ttl);
    }

    /// `insert` unless `retired` is set. The flag is read under the cache
    /// lock, so a writer retired before a `clear_entity` can't slip a value
    /// in after it. Returns true if the value was published.
    pub fn insert_unless(&self, key: CacheKey, value: CacheValue, retired: &AtomicBool) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if retired.load(Ordering::Acquire) {
            trace!("Dropped retired write {}:{}", key.entity, key.frame_idx);
            return false;
        }
        self.publish(&mut entries, key, value, None);
        true
    }

    fn publish(
        &self,
        entries: &mut LruCache<CacheKey, CacheEntry>,
        key: CacheKey,
        value: CacheValue,
        ttl: Option<Duration>,
    ) {
        let size = value.mem();
        let expires_at = Instant::now() + ttl.unwrap_or(self.default_ttl);

        if let Some(old) = entries.pop(&key) {
            self.manager.free_memory(old.size);
        }

        if let Some((evicted_key, evicted)) = entries.push(key, CacheEntry { value, expires_at, size }) {
            self.manager.free_memory(evicted.size);
            self.stats.record_eviction();
            debug!("LRU evicted {}:{}", evicted_key.entity, evicted_key.frame_idx);
        }
        self.manager.add_memory(size);
        self.stats.record_insert();

        // Memory budget: evict from the cold end, never the entry just written
        while self.manager.check_memory_limit() && entries.len() > 1 {
            match entries.pop_lru() {
                Some((evicted_key, evicted)) => {
                    self.manager.free_memory(evicted.size);
                    self.stats.record_eviction();
                    debug!(
                        "Memory evicted {}:{} ({} bytes)",
                        evicted_key.entity, evicted_key.frame_idx, evicted.size
                    );
                }
                None => break,
            }
        }

        trace!("Cached {}:{}:{} ({} bytes)", key.entity, key.frame_idx, key.variant.as_str(), size);
    }

    /// `set` with the default TTL
    pub fn insert(&self, key: CacheKey, value: CacheValue) {
        self.set(key, value, None);
    }

    /// Drop one entry. Returns true if it was present.
    pub fn clear(&self, key: &CacheKey) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.pop(key) {
            Some(entry) => {
                self.manager.free_memory(entry.size);
                true
            }
            None => false,
        }
    }

    /// Drop every entry of one entity. Returns the number removed.
    pub fn clear_entity(&self, entity: EntityId) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let keys: Vec<CacheKey> = entries
            .iter()
            .filter(|(k, _)| k.entity == entity)
            .map(|(k, _)| *k)
            .collect();
        let mut freed = 0usize;
        for key in &keys {
            if let Some(entry) = entries.pop(key) {
                freed += entry.size;
            }
        }
        self.manager.free_memory(freed);
        if !keys.is_empty() {
            debug!("Cleared entity {}: {} entries, {} KB freed", entity, keys.len(), freed / 1024);
        }
        keys.len()
    }

    pub fn clear_all(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let freed: usize = entries.iter().map(|(_, e)| e.size).sum();
        entries.clear();
        self.manager.free_memory(freed);
        debug!("Cleared entire cache");
    }

    /// Drop all expired entries. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let stale: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, e)| !e.is_live(now))
            .map(|(k, _)| *k)
            .collect();
        for key in &stale {
            if let Some(entry) = entries.pop(key) {
                self.manager.free_memory(entry.size);
                self.stats.record_expiration();
            }
        }
        stale.len()
    }

    /// Fill missing keys from `producer` without touching hit/miss counters.
    ///
    /// The lock is not held while `producer` runs. Returns how many values
    /// were written.
    pub fn preload<I, F>(&self, keys: I, producer: F) -> usize
    where
        I: IntoIterator<Item = CacheKey>,
        F: FnMut(&CacheKey) -> Option<CacheValue>,
    {
        self.preload_unless(keys, &AtomicBool::new(false), producer)
    }

    /// `preload` that stops writing as soon as `retired` is set.
    pub fn preload_unless<I, F>(&self, keys: I, retired: &AtomicBool, mut producer: F) -> usize
    where
        I: IntoIterator<Item = CacheKey>,
        F: FnMut(&CacheKey) -> Option<CacheValue>,
    {
        let mut written = 0;
        for key in keys {
            if retired.load(Ordering::Acquire) {
                debug!("Preload stopped: writer retired");
                break;
            }
            if self.contains(&key) {
                continue;
            }
            if let Some(value) = producer(&key)
                && self.insert_unless(key, value, retired)
            {
                written += 1;
            }
        }
        if written > 0 {
            debug!("Preloaded {} entries", written);
        }
        written
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits(),
            misses: self.stats.misses(),
            hit_rate: self.stats.hit_rate(),
            total_entries_cached: self.stats.inserts(),
            evictions: self.stats.evictions(),
            expirations: self.stats.expirations(),
            entries: self.len(),
            memory_bytes: self.manager.mem().0,
        }
    }

    /// Live counters (shared)
    pub fn stats_ref(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).cap().get()
    }

    pub fn manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }
}
