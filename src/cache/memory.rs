//! Memory Cache - Bounded In-Process Tier
//!
//! Fast, non-persistent cache holding values in a single hash map.
//!
//! # Design
//!
//! - One `parking_lot::Mutex` guards the primary map and the tag index, so
//!   tag bookkeeping is always consistent with the stored keys
//! - Expiration is lazy: an expired entry is dropped on the next access and
//!   that access counts as a miss ([`MemoryCache::purge_expired`] sweeps
//!   explicitly)
//! - Inserting a *new* key at capacity evicts exactly one victim chosen by
//!   the configured [`EvictionStrategy`]; replacing a key never evicts
//! - Recency and insertion order use logical counters, so eviction order is
//!   deterministic within one clock tick
//!
//! The tier never awaits. Events are published after the lock is released.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use super::entry::{expiry_at, CacheEntry, CacheOptions, CacheValue, KeyTtl};
use super::events::{CacheEvent, EventBus, DEFAULT_EVENT_CAPACITY};
use super::pattern::GlobPattern;
use super::policy::EvictionStrategy;
use super::stats::{CacheStatistics, TierCounters, MEMORY_TIER};
use crate::error::Result;

/// Memory tier configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryCacheConfig {
    /// Maximum number of entries (0 = unbounded)
    pub max_size: usize,
    /// TTL applied when a write does not specify one (zero = never expires)
    pub default_ttl: Duration,
    /// Victim selection when full
    pub strategy: EvictionStrategy,
    /// Event channel capacity
    pub event_capacity: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl: Duration::from_secs(3600),
            strategy: EvictionStrategy::Lru,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: HashMap<String, CacheEntry>,
    /// tag -> keys; the reverse direction is each entry's tag set
    tag_index: HashMap<String, HashSet<String>>,
    next_sequence: u64,
}

impl MemoryInner {
    /// Advance the logical clock shared by insertion and access order
    fn tick(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    fn index_tags(&mut self, key: &str, tags: &HashSet<String>) {
        for tag in tags {
            self.tag_index
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    /// Remove a key from the map and from every tag set that references it
    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        for tag in &entry.tags {
            if let Some(keys) = self.tag_index.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }
        Some(entry)
    }

    /// Remove `keys`, splitting them into the number of live entries
    /// removed and the keys that had already expired
    fn remove_keys<'k>(&mut self, keys: impl IntoIterator<Item = &'k String>, now: DateTime<Utc>) -> (u64, Vec<String>) {
        let mut live = 0;
        let mut expired = Vec::new();
        for key in keys {
            match self.remove_entry(key) {
                Some(entry) if entry.is_expired_at(now) => expired.push(entry.key),
                Some(_) => live += 1,
                None => {}
            }
        }
        (live, expired)
    }

    fn evict_one(&mut self, strategy: EvictionStrategy) -> Option<String> {
        let victim = strategy.select_victim(self.entries.values())?.key.clone();
        self.remove_entry(&victim);
        Some(victim)
    }

    fn insert(&mut self, key: String, value: CacheValue, expires_at: Option<DateTime<Utc>>, options: &CacheOptions, now: DateTime<Utc>) {
        let sequence = self.tick();
        let entry = CacheEntry::new(key.clone(), value, expires_at, options, sequence, now);
        self.index_tags(&key, &entry.tags);
        self.entries.insert(key, entry);
    }

    /// Drop `key` if it has expired; returns true when it was dropped
    fn expire_if_needed(&mut self, key: &str, now: DateTime<Utc>) -> bool {
        let expired = self
            .entries
            .get(key)
            .map(|e| e.is_expired_at(now))
            .unwrap_or(false);
        if expired {
            self.remove_entry(key);
        }
        expired
    }

    fn is_consistent(&self) -> bool {
        let forward_ok = self.tag_index.iter().all(|(tag, keys)| {
            !keys.is_empty()
                && keys.iter().all(|key| {
                    self.entries
                        .get(key)
                        .map(|e| e.tags.contains(tag))
                        .unwrap_or(false)
                })
        });
        let reverse_ok = self.entries.iter().all(|(key, entry)| {
            entry.tags.iter().all(|tag| {
                self.tag_index
                    .get(tag)
                    .map(|keys| keys.contains(key))
                    .unwrap_or(false)
            })
        });
        forward_ok && reverse_ok
    }
}

/// Bounded in-process cache
pub struct MemoryCache {
    inner: Mutex<MemoryInner>,
    config: MemoryCacheConfig,
    stats: Arc<TierCounters>,
    events: EventBus,
}

impl MemoryCache {
    /// Create a memory cache with its own statistics
    pub fn new(config: MemoryCacheConfig) -> Self {
        Self::with_stats(config, Arc::new(TierCounters::new()))
    }

    /// Create a memory cache recording into shared counters
    pub fn with_stats(config: MemoryCacheConfig, stats: Arc<TierCounters>) -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
            events: EventBus::new(config.event_capacity),
            config,
            stats,
        }
    }

    /// Get a value, recording a hit or a miss
    pub fn get(&self, key: &str) -> Option<CacheValue> {
        let now = Utc::now();
        let mut inner = self.inner.lock();

        if inner.expire_if_needed(key, now) {
            drop(inner);
            self.stats.record_miss();
            self.events.emit(CacheEvent::Expired {
                key: key.to_string(),
            });
            return None;
        }

        let tick = inner.tick();
        let value = inner.entries.get_mut(key).map(|entry| {
            entry.record_access(tick, now);
            entry.value.clone()
        });
        drop(inner);

        match value {
            Some(_) => self.stats.record_hit(),
            None => self.stats.record_miss(),
        }
        value
    }

    /// Copy of a live entry without touching access bookkeeping or statistics
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        let now = Utc::now();
        self.inner
            .lock()
            .entries
            .get(key)
            .filter(|e| !e.is_expired_at(now))
            .cloned()
    }

    /// Insert or replace a value
    pub fn set(&self, key: impl Into<String>, value: CacheValue, options: &CacheOptions) {
        let key = key.into();
        let now = Utc::now();
        let expires_at = expiry_at(options.ttl, self.config.default_ttl, now);

        let evicted = {
            let mut inner = self.inner.lock();
            let evicted = if inner.remove_entry(&key).is_some() {
                None
            } else if self.config.max_size > 0 && inner.entries.len() >= self.config.max_size {
                inner.evict_one(self.config.strategy)
            } else {
                None
            };
            inner.insert(key, value, expires_at, options, now);
            debug_assert!(inner.entries.len() <= self.config.max_size || self.config.max_size == 0);
            evicted
        };

        self.stats.record_set();
        if let Some(victim) = evicted {
            debug!(key = %victim, strategy = %self.config.strategy, "Evicted cache entry");
            self.stats.record_eviction();
            self.events.emit(CacheEvent::Evicted {
                key: victim,
                strategy: self.config.strategy,
            });
        }
    }

    /// Delete a key; true if it was present
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.inner.lock().remove_entry(key).is_some();
        if removed {
            self.stats.record_deletes(1);
        }
        removed
    }

    /// Check for a live key (no statistics)
    pub fn has(&self, key: &str) -> bool {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        if inner.expire_if_needed(key, now) {
            return false;
        }
        inner.entries.contains_key(key)
    }

    /// Remove every entry; returns the number removed
    pub fn clear(&self) -> u64 {
        let count = {
            let mut inner = self.inner.lock();
            let count = inner.entries.len() as u64;
            inner.entries.clear();
            inner.tag_index.clear();
            count
        };
        self.events.emit(CacheEvent::Cleared {
            tier: MEMORY_TIER.to_string(),
            count,
        });
        count
    }

    /// Get several values; absent keys are omitted from the result
    pub fn get_many(&self, keys: &[String]) -> HashMap<String, CacheValue> {
        keys.iter()
            .filter_map(|key| self.get(key).map(|value| (key.clone(), value)))
            .collect()
    }

    /// Set several values with the same options
    pub fn set_many(&self, items: Vec<(String, CacheValue)>, options: &CacheOptions) {
        for (key, value) in items {
            self.set(key, value, options);
        }
    }

    /// Delete several keys; returns how many were present
    pub fn delete_many(&self, keys: &[String]) -> u64 {
        let count = {
            let mut inner = self.inner.lock();
            keys.iter()
                .filter(|key| inner.remove_entry(key).is_some())
                .count() as u64
        };
        self.stats.record_deletes(count);
        count
    }

    /// Delete every key carrying `tag`; returns how many were removed
    pub fn invalidate_tag(&self, tag: &str) -> u64 {
        let now = Utc::now();
        let (count, expired) = {
            let mut inner = self.inner.lock();
            let keys = inner.tag_index.remove(tag).unwrap_or_default();
            let removed = inner.remove_keys(&keys, now);
            debug_assert!(inner.is_consistent());
            removed
        };

        self.emit_expired(expired);
        self.stats.record_deletes(count);
        debug!(tag = %tag, count, "Invalidated tag in memory tier");
        self.events.emit(CacheEvent::TagInvalidated {
            tag: tag.to_string(),
            count,
        });
        count
    }

    /// Invalidate several tags; returns the total removed
    pub fn invalidate_tags(&self, tags: &[String]) -> u64 {
        tags.iter().map(|tag| self.invalidate_tag(tag)).sum()
    }

    /// Live keys carrying `tag`, sorted
    pub fn get_by_tag(&self, tag: &str) -> Vec<String> {
        let now = Utc::now();
        let inner = self.inner.lock();
        let mut keys: Vec<String> = inner
            .tag_index
            .get(tag)
            .map(|keys| {
                keys.iter()
                    .filter(|key| {
                        inner
                            .entries
                            .get(key.as_str())
                            .map(|e| !e.is_expired_at(now))
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Live keys matching a glob pattern, sorted
    pub fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let glob = GlobPattern::new(pattern)?;
        let now = Utc::now();
        let inner = self.inner.lock();
        let mut keys: Vec<String> = inner
            .entries
            .values()
            .filter(|e| !e.is_expired_at(now) && glob.matches(&e.key))
            .map(|e| e.key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Delete every live key matching a glob pattern. Expired matches are
    /// dropped as well but not counted.
    pub fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let glob = GlobPattern::new(pattern)?;
        let now = Utc::now();
        let (count, expired) = {
            let mut inner = self.inner.lock();
            let matching: Vec<String> = inner
                .entries
                .keys()
                .filter(|key| glob.matches(key))
                .cloned()
                .collect();
            inner.remove_keys(&matching, now)
        };
        self.emit_expired(expired);
        self.stats.record_deletes(count);
        Ok(count)
    }

    /// Remaining lifetime of a key
    pub fn ttl(&self, key: &str) -> KeyTtl {
        let now = Utc::now();
        self.inner
            .lock()
            .entries
            .get(key)
            .map(|e| e.ttl_at(now))
            .unwrap_or(KeyTtl::Missing)
    }

    /// Reset a key's expiry; zero removes it. Returns false for absent keys.
    pub fn expire(&self, key: &str, ttl: Duration) -> bool {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        if inner.expire_if_needed(key, now) {
            return false;
        }
        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = expiry_at(Some(ttl), Duration::ZERO, now);
                true
            }
            None => false,
        }
    }

    /// Remove every expired entry; returns the number removed
    pub fn purge_expired(&self) -> u64 {
        let now = Utc::now();
        let expired: Vec<String> = {
            let mut inner = self.inner.lock();
            let expired: Vec<String> = inner
                .entries
                .values()
                .filter(|e| e.is_expired_at(now))
                .map(|e| e.key.clone())
                .collect();
            for key in &expired {
                inner.remove_entry(key);
            }
            expired
        };

        let count = expired.len() as u64;
        self.emit_expired(expired);
        if count > 0 {
            debug!(count, "Purged expired memory entries");
        }
        count
    }

    fn emit_expired(&self, keys: Vec<String>) {
        for key in keys {
            self.events.emit(CacheEvent::Expired { key });
        }
    }

    /// Write, read back and remove a probe entry without touching statistics
    pub(crate) fn probe(&self, key: &str, value: &CacheValue) -> bool {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        inner.insert(key.to_string(), value.clone(), None, &CacheOptions::default(), now);
        let read_back = inner.entries.get(key).map(|e| &e.value == value).unwrap_or(false);
        inner.remove_entry(key);
        read_back
    }

    /// Number of stored entries (including expired ones not yet collected)
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config(&self) -> &MemoryCacheConfig {
        &self.config
    }

    /// Statistics snapshot
    pub fn stats(&self) -> CacheStatistics {
        self.stats.snapshot(MEMORY_TIER)
    }

    /// Subscribe to eviction, expiry and invalidation events
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Check that the tag index agrees with the stored entries
    pub fn tag_index_consistent(&self) -> bool {
        self.inner.lock().is_consistent()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(MemoryCacheConfig::default())
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("config", &self.config)
            .field("len", &self.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn cache(max_size: usize, strategy: EvictionStrategy) -> MemoryCache {
        MemoryCache::new(MemoryCacheConfig {
            max_size,
            strategy,
            ..Default::default()
        })
    }

    fn opts() -> CacheOptions {
        CacheOptions::new()
    }

    #[test]
    fn test_get_set_delete() {
        let cache = MemoryCache::default();
        assert!(cache.get("k").is_none());

        cache.set("k", json!({"a": 1}), &opts());
        assert_eq!(cache.get("k"), Some(json!({"a": 1})));
        assert!(cache.has("k"));

        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
        assert!(!cache.has("k"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.deletes, 1);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = cache(3, EvictionStrategy::Lru);
        cache.set("a", json!(1), &opts());
        cache.set("b", json!(2), &opts());
        cache.set("c", json!(3), &opts());

        // Touch a so b becomes least recently used
        assert!(cache.get("a").is_some());
        cache.set("d", json!(4), &opts());

        assert_eq!(cache.len(), 3);
        assert!(cache.has("a"));
        assert!(!cache.has("b"));
        assert!(cache.has("c"));
        assert!(cache.has("d"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_lfu_eviction() {
        let cache = cache(2, EvictionStrategy::Lfu);
        cache.set("a", json!(1), &opts());
        cache.set("b", json!(2), &opts());
        cache.get("a");
        cache.get("a");
        cache.get("b");

        cache.set("c", json!(3), &opts());
        assert!(cache.has("a"));
        assert!(!cache.has("b"));
    }

    #[test]
    fn test_fifo_eviction() {
        let cache = cache(2, EvictionStrategy::Fifo);
        cache.set("a", json!(1), &opts());
        cache.set("b", json!(2), &opts());
        cache.get("a");

        cache.set("c", json!(3), &opts());
        assert!(!cache.has("a"));
        assert!(cache.has("b"));
    }

    #[test]
    fn test_ttl_eviction_skips_persistent_entries() {
        let cache = cache(2, EvictionStrategy::Ttl);
        cache.set("forever", json!(1), &opts().persistent());
        cache.set("short", json!(2), &opts().with_ttl_secs(30));

        cache.set("new", json!(3), &opts().persistent());
        assert!(cache.has("forever"));
        assert!(!cache.has("short"));
    }

    #[test]
    fn test_replacing_key_never_evicts() {
        let cache = cache(2, EvictionStrategy::Lru);
        cache.set("a", json!(1), &opts());
        cache.set("b", json!(2), &opts());
        cache.set("a", json!(10), &opts());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(json!(10)));
        assert!(cache.has("b"));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_unbounded_when_max_size_zero() {
        let cache = cache(0, EvictionStrategy::Lru);
        for i in 0..50 {
            cache.set(format!("k{}", i), json!(i), &opts());
        }
        assert_eq!(cache.len(), 50);
    }

    #[test]
    fn test_lazy_expiration_counts_miss() {
        let cache = MemoryCache::default();
        cache.set("k", json!(1), &opts());
        cache.inner.lock().entries.get_mut("k").unwrap().expires_at =
            Some(Utc::now() - chrono::Duration::seconds(1));

        let mut rx = cache.subscribe();
        assert!(cache.get("k").is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(rx.try_recv().unwrap(), CacheEvent::Expired { key: "k".into() });
    }

    #[test]
    fn test_tag_invalidation() {
        let cache = MemoryCache::default();
        cache.set("a", json!(1), &opts().with_tags(["users", "hot"]));
        cache.set("b", json!(2), &opts().with_tag("users"));
        cache.set("c", json!(3), &opts().with_tag("hot"));

        assert_eq!(cache.get_by_tag("users"), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(cache.invalidate_tag("users"), 2);
        assert!(cache.get_by_tag("users").is_empty());
        assert!(!cache.has("a"));
        assert!(!cache.has("b"));

        // a was removed from the "hot" tag set as well
        assert_eq!(cache.get_by_tag("hot"), vec!["c".to_string()]);
        assert!(cache.tag_index_consistent());
    }

    #[test]
    fn test_delete_prunes_tags() {
        let cache = MemoryCache::default();
        cache.set("a", json!(1), &opts().with_tag("t"));
        cache.delete("a");
        assert!(cache.get_by_tag("t").is_empty());
        assert!(cache.inner.lock().tag_index.is_empty());
    }

    #[test]
    fn test_overwrite_replaces_tags() {
        let cache = MemoryCache::default();
        cache.set("a", json!(1), &opts().with_tag("old"));
        cache.set("a", json!(2), &opts().with_tag("new"));
        assert!(cache.get_by_tag("old").is_empty());
        assert_eq!(cache.get_by_tag("new"), vec!["a".to_string()]);
        assert!(cache.tag_index_consistent());
    }

    #[test]
    fn test_eviction_prunes_tags() {
        let cache = cache(1, EvictionStrategy::Fifo);
        cache.set("a", json!(1), &opts().with_tag("t"));
        cache.set("b", json!(2), &opts());
        assert!(cache.get_by_tag("t").is_empty());
        assert!(cache.tag_index_consistent());
    }

    #[test]
    fn test_keys_and_delete_pattern() {
        let cache = MemoryCache::default();
        for key in ["user:1", "user:abc", "users:1", "xuser:1"] {
            cache.set(key, json!(key), &opts());
        }

        assert_eq!(
            cache.keys("user:*").unwrap(),
            vec!["user:1".to_string(), "user:abc".to_string()]
        );
        assert_matches!(cache.keys("user:[1"), Err(Error::InvalidPattern { .. }));

        assert_eq!(cache.delete_pattern("user:*").unwrap(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_bulk_deletes_skip_expired_entries() {
        let cache = MemoryCache::default();
        for key in ["p1", "p2", "p3"] {
            cache.set(key, json!(key), &opts().with_tag("t"));
        }
        cache.set("q1", json!(1), &opts().with_tag("u"));
        cache.set("q2", json!(2), &opts().with_tag("u"));
        for key in ["p2", "q2"] {
            cache.inner.lock().entries.get_mut(key).unwrap().expires_at =
                Some(Utc::now() - chrono::Duration::seconds(1));
        }

        let listed = cache.keys("p*").unwrap().len() as u64;
        let mut rx = cache.subscribe();
        assert_eq!(cache.delete_pattern("p*").unwrap(), listed);
        assert_eq!(listed, 2);
        assert_eq!(rx.try_recv().unwrap(), CacheEvent::Expired { key: "p2".into() });

        assert_eq!(cache.get_by_tag("u").len(), 1);
        assert_eq!(cache.invalidate_tag("u"), 1);
        assert_eq!(rx.try_recv().unwrap(), CacheEvent::Expired { key: "q2".into() });
        assert_eq!(cache.stats().deletes, 3);
        assert_eq!(cache.len(), 0);
        assert!(cache.tag_index_consistent());
    }

    #[test]
    fn test_bulk_operations() {
        let cache = MemoryCache::default();
        cache.set_many(
            vec![("a".into(), json!(1)), ("b".into(), json!(2))],
            &opts(),
        );
        let found = cache.get_many(&["a".into(), "b".into(), "c".into()]);
        assert_eq!(found.len(), 2);
        assert_eq!(found["b"], json!(2));
        assert_eq!(cache.delete_many(&["a".into(), "c".into()]), 1);
    }

    #[test]
    fn test_ttl_and_expire() {
        let cache = MemoryCache::default();
        assert_eq!(cache.ttl("k"), KeyTtl::Missing);

        cache.set("k", json!(1), &opts().persistent());
        assert_eq!(cache.ttl("k"), KeyTtl::Persistent);

        assert!(cache.expire("k", Duration::from_secs(60)));
        assert_matches!(cache.ttl("k"), KeyTtl::Expires(d) if d.as_secs() >= 59);

        assert!(cache.expire("k", Duration::ZERO));
        assert_eq!(cache.ttl("k"), KeyTtl::Persistent);
        assert!(!cache.expire("missing", Duration::from_secs(1)));
    }

    #[test]
    fn test_purge_expired() {
        let cache = MemoryCache::default();
        cache.set("a", json!(1), &opts());
        cache.set("b", json!(2), &opts().with_tag("t"));
        cache.inner.lock().entries.get_mut("b").unwrap().expires_at =
            Some(Utc::now() - chrono::Duration::seconds(1));

        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.has("a"));
        assert!(cache.get_by_tag("t").is_empty());
    }

    #[test]
    fn test_clear_emits_event() {
        let cache = MemoryCache::default();
        let mut rx = cache.subscribe();
        cache.set("a", json!(1), &opts().with_tag("t"));
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
        assert_eq!(
            rx.try_recv().unwrap(),
            CacheEvent::Cleared {
                tier: "memory".into(),
                count: 1
            }
        );
    }

    #[test]
    fn test_probe_leaves_no_trace() {
        let cache = MemoryCache::default();
        assert!(cache.probe("__probe__", &json!({"ok": true})));
        assert!(cache.is_empty());
        assert_eq!(cache.stats().sets, 0);
    }

    #[test]
    fn test_concurrent_writers_respect_capacity() {
        let cache = Arc::new(cache(16, EvictionStrategy::Lru));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        cache.set(format!("{}-{}", t, i), json!(i), &CacheOptions::new().with_tag("bulk"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 16);
        assert_eq!(cache.get_by_tag("bulk").len(), 16);
        assert!(cache.tag_index_consistent());
    }
}
