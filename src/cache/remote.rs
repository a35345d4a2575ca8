//! Remote Cache Adapter
//!
//! Exposes the memory-tier operations against a [`RemoteBackend`].
//!
//! # Key Layout
//!
//! All keys live under a configurable prefix (default `cache:`):
//!
//! | Key                 | Holds                                 |
//! |---------------------|---------------------------------------|
//! | `{prefix}v:{key}`   | encoded value                         |
//! | `{prefix}t:{tag}`   | set of keys carrying `tag`            |
//! | `{prefix}k:{key}`   | set of tags attached to `key`         |
//! | `{prefix}x:{name}`  | auxiliary hash/list/set/sorted-set    |
//!
//! Tag sets expire with the cache's default TTL when it is non-zero.
//!
//! # Readiness
//!
//! [`RemoteCache::initialize`] retries `connect` with capped exponential
//! backoff until the connect timeout elapses. Every operation issued before
//! readiness fails with [`Error::BackendUnavailable`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::backend::RemoteBackend;
use super::codec::{CodecConfig, ValueCodec};
use super::entry::{effective_ttl, CacheOptions, CacheValue, KeyTtl};
use super::events::{CacheEvent, EventBus, DEFAULT_EVENT_CAPACITY};
use super::pattern::{escape_glob, GlobPattern};
use super::stats::{CacheStatistics, TierCounters, REMOTE_TIER};
use crate::error::{Error, Result};

/// Keys deleted per backend round-trip when clearing
const DELETE_CHUNK: usize = 500;

/// Remote tier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db_index: i64,
    /// Namespace for every key written by this cache
    pub key_prefix: String,
    /// Upper bound on start-up retries
    pub connect_timeout_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Value encoding limits
    pub codec: CodecConfig,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db_index: 0,
            key_prefix: "cache:".to_string(),
            connect_timeout_ms: 5000,
            initial_backoff_ms: 50,
            max_backoff_ms: 2000,
            codec: CodecConfig::default(),
        }
    }
}

impl RemoteConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Metadata needed to promote a remote value into memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntryMeta {
    pub ttl: KeyTtl,
    pub tags: Vec<String>,
}

/// Cache tier backed by a remote key-value server
pub struct RemoteCache {
    backend: Arc<dyn RemoteBackend>,
    config: RemoteConfig,
    default_ttl: Duration,
    codec: ValueCodec,
    ready: AtomicBool,
    stats: Arc<TierCounters>,
    events: EventBus,
}

impl RemoteCache {
    /// Create an adapter that is not yet connected
    pub fn new(
        backend: Arc<dyn RemoteBackend>,
        config: RemoteConfig,
        default_ttl: Duration,
        stats: Arc<TierCounters>,
    ) -> Self {
        Self {
            codec: ValueCodec::new(config.codec.clone()),
            backend,
            config,
            default_ttl,
            ready: AtomicBool::new(false),
            stats,
            events: EventBus::new(DEFAULT_EVENT_CAPACITY),
        }
    }

    /// Create and initialize in one step
    pub async fn connect(
        backend: Arc<dyn RemoteBackend>,
        config: RemoteConfig,
        default_ttl: Duration,
    ) -> Result<Self> {
        let cache = Self::new(backend, config, default_ttl, Arc::new(TierCounters::new()));
        cache.initialize().await?;
        Ok(cache)
    }

    /// Connect with retries; fails with `InitializationTimeout` when the
    /// connect timeout elapses first
    pub async fn initialize(&self) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }

        let name = self.backend.name().to_string();
        let initial = Duration::from_millis(self.config.initial_backoff_ms.max(1));
        let max_backoff = Duration::from_millis(self.config.max_backoff_ms.max(1));

        let attempts = async {
            let mut backoff = initial;
            let mut attempt: u32 = 0;
            loop {
                attempt += 1;
                match self.backend.connect().await {
                    Ok(()) => return attempt,
                    Err(e) => {
                        warn!(
                            backend = %name,
                            attempt,
                            retry_in_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Remote cache connection attempt failed"
                        );
                        self.events.emit(CacheEvent::ConnectionRetry {
                            backend: name.clone(),
                            attempt,
                            error: e.to_string(),
                        });
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(max_backoff);
                    }
                }
            }
        };

        match tokio::time::timeout(self.config.connect_timeout(), attempts).await {
            Ok(attempts) => {
                self.ready.store(true, Ordering::Release);
                info!(backend = %name, attempts, "Remote cache connected");
                self.events.emit(CacheEvent::Connected {
                    backend: name,
                    attempts,
                });
                Ok(())
            }
            Err(_) => Err(Error::InitializationTimeout {
                backend: name,
                timeout_ms: self.config.connect_timeout_ms,
            }),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(Error::BackendUnavailable(format!(
                "remote cache '{}' is not connected",
                self.backend.name()
            )))
        }
    }

    // =========================================================================
    // Key layout
    // =========================================================================

    fn value_key(&self, key: &str) -> String {
        format!("{}v:{}", self.config.key_prefix, key)
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}t:{}", self.config.key_prefix, tag)
    }

    fn key_tags_key(&self, key: &str) -> String {
        format!("{}k:{}", self.config.key_prefix, key)
    }

    fn aux_key(&self, name: &str) -> String {
        format!("{}x:{}", self.config.key_prefix, name)
    }

    fn value_prefix(&self) -> String {
        format!("{}v:", self.config.key_prefix)
    }

    // =========================================================================
    // Core operations
    // =========================================================================

    /// Get a value, recording a hit or a miss
    pub async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        self.ensure_ready()?;
        match self.backend.get(&self.value_key(key)).await? {
            Some(raw) => {
                self.stats.record_hit();
                Ok(Some(self.codec.decode(&raw)))
            }
            None => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    /// Remaining TTL and tags of a key (no statistics)
    pub async fn entry_meta(&self, key: &str) -> Result<RemoteEntryMeta> {
        self.ensure_ready()?;
        let ttl = self.backend.ttl(&self.value_key(key)).await?;
        let mut tags = self.backend.smembers(&self.key_tags_key(key)).await?;
        tags.sort();
        Ok(RemoteEntryMeta { ttl, tags })
    }

    /// Store a value and link its tags
    pub async fn set(&self, key: &str, value: &CacheValue, options: &CacheOptions) -> Result<()> {
        self.ensure_ready()?;
        let encoded = self.codec.encode(value, options.compressed)?;
        let ttl = effective_ttl(options.ttl, self.default_ttl);
        self.backend.set(&self.value_key(key), encoded, ttl).await?;
        self.link_tags(key, &options.tags).await?;
        self.stats.record_set();
        Ok(())
    }

    /// Replace the tag links of `key` with `tags`
    async fn link_tags(&self, key: &str, tags: &[String]) -> Result<()> {
        let reverse_key = self.key_tags_key(key);
        let previous: HashSet<String> = self.backend.smembers(&reverse_key).await?.into_iter().collect();
        let wanted: HashSet<String> = tags.iter().cloned().collect();

        let member = [key.to_string()];
        for stale in previous.difference(&wanted) {
            self.backend.srem(&self.tag_key(stale), &member).await?;
        }

        if wanted.is_empty() {
            if !previous.is_empty() {
                self.backend.del(&[reverse_key]).await?;
            }
            return Ok(());
        }

        for tag in &wanted {
            let tag_key = self.tag_key(tag);
            self.backend.sadd(&tag_key, &member).await?;
            self.expire_index(&tag_key).await?;
        }
        let stale: Vec<String> = previous.difference(&wanted).cloned().collect();
        if !stale.is_empty() {
            self.backend.srem(&reverse_key, &stale).await?;
        }
        let wanted: Vec<String> = wanted.into_iter().collect();
        self.backend.sadd(&reverse_key, &wanted).await?;
        self.expire_index(&reverse_key).await?;
        Ok(())
    }

    async fn expire_index(&self, key: &str) -> Result<()> {
        if !self.default_ttl.is_zero() {
            self.backend.expire(key, self.default_ttl).await?;
        }
        Ok(())
    }

    /// Remove `key` from every tag set it belongs to
    async fn unlink_tags(&self, key: &str) -> Result<()> {
        let reverse_key = self.key_tags_key(key);
        let tags = self.backend.smembers(&reverse_key).await?;
        if tags.is_empty() {
            return Ok(());
        }
        let member = [key.to_string()];
        for tag in &tags {
            self.backend.srem(&self.tag_key(tag), &member).await?;
        }
        self.backend.del(&[reverse_key]).await?;
        Ok(())
    }

    /// Delete a key; true if it existed
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_ready()?;
        let removed = self.backend.del(&[self.value_key(key)]).await? > 0;
        self.unlink_tags(key).await?;
        if removed {
            self.stats.record_deletes(1);
        }
        Ok(removed)
    }

    pub async fn has(&self, key: &str) -> Result<bool> {
        self.ensure_ready()?;
        self.backend.exists(&self.value_key(key)).await
    }

    /// Remove every key under the prefix; returns the number of values removed
    pub async fn clear(&self) -> Result<u64> {
        self.ensure_ready()?;
        let all = self
            .backend
            .keys(&format!("{}*", escape_glob(&self.config.key_prefix)))
            .await?;
        let value_prefix = self.value_prefix();
        let values = all.iter().filter(|k| k.starts_with(&value_prefix)).count() as u64;

        for chunk in all.chunks(DELETE_CHUNK) {
            self.backend.del(chunk).await?;
        }

        debug!(values, keys = all.len(), "Cleared remote cache");
        self.events.emit(CacheEvent::Cleared {
            tier: REMOTE_TIER.to_string(),
            count: values,
        });
        Ok(values)
    }

    /// Get several values; absent keys are omitted
    pub async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, CacheValue>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key).await? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    /// Set several values with the same options
    pub async fn set_many(&self, items: &[(String, CacheValue)], options: &CacheOptions) -> Result<()> {
        for (key, value) in items {
            self.set(key, value, options).await?;
        }
        Ok(())
    }

    /// Delete several keys; returns how many existed
    pub async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        let mut count = 0;
        for key in keys {
            if self.delete(key).await? {
                count += 1;
            }
        }
        Ok(count)
    }

    // =========================================================================
    // Tags
    // =========================================================================

    /// Delete every key carrying `tag`, then the tag set itself
    pub async fn invalidate_tag(&self, tag: &str) -> Result<u64> {
        self.ensure_ready()?;
        let tag_key = self.tag_key(tag);
        let keys = self.backend.smembers(&tag_key).await?;

        let mut count = 0;
        for key in &keys {
            if self.delete(key).await? {
                count += 1;
            }
        }
        self.backend.del(&[tag_key]).await?;

        debug!(tag = %tag, count, "Invalidated tag in remote tier");
        self.events.emit(CacheEvent::TagInvalidated {
            tag: tag.to_string(),
            count,
        });
        Ok(count)
    }

    pub async fn invalidate_tags(&self, tags: &[String]) -> Result<u64> {
        let mut total = 0;
        for tag in tags {
            total += self.invalidate_tag(tag).await?;
        }
        Ok(total)
    }

    /// Keys carrying `tag`, sorted
    pub async fn get_by_tag(&self, tag: &str) -> Result<Vec<String>> {
        self.ensure_ready()?;
        let mut keys = self.backend.smembers(&self.tag_key(tag)).await?;
        keys.sort();
        Ok(keys)
    }

    // =========================================================================
    // Patterns and expiry
    // =========================================================================

    /// Keys matching a glob pattern, sorted
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        GlobPattern::new(pattern)?;
        self.ensure_ready()?;
        let value_prefix = self.value_prefix();
        let qualified = format!("{}{}", escape_glob(&value_prefix), pattern);
        let mut keys: Vec<String> = self
            .backend
            .keys(&qualified)
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(&value_prefix).map(str::to_string))
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Delete every key matching a glob pattern
    pub async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let keys = self.keys(pattern).await?;
        self.delete_many(&keys).await
    }

    pub async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        self.ensure_ready()?;
        self.backend.ttl(&self.value_key(key)).await
    }

    /// Reset a key's expiry; zero removes it. Returns false for absent keys.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.ensure_ready()?;
        let value_key = self.value_key(key);
        if ttl.is_zero() {
            if !self.backend.exists(&value_key).await? {
                return Ok(false);
            }
            self.backend.persist(&value_key).await?;
            return Ok(true);
        }
        self.backend.expire(&value_key, ttl).await
    }

    /// Round-trip latency to the backend
    pub async fn ping(&self) -> Result<Duration> {
        self.ensure_ready()?;
        let started = Instant::now();
        self.backend.ping().await?;
        Ok(started.elapsed())
    }

    // =========================================================================
    // Auxiliary structures
    // =========================================================================

    pub async fn hash_get(&self, name: &str, field: &str) -> Result<Option<CacheValue>> {
        self.ensure_ready()?;
        let raw = self.backend.hget(&self.aux_key(name), field).await?;
        Ok(raw.map(|raw| self.codec.decode(&raw)))
    }

    /// True when the field was newly created
    pub async fn hash_set(&self, name: &str, field: &str, value: &CacheValue) -> Result<bool> {
        self.ensure_ready()?;
        let encoded = self.codec.encode(value, false)?;
        self.backend.hset(&self.aux_key(name), field, encoded).await
    }

    pub async fn hash_get_all(&self, name: &str) -> Result<HashMap<String, CacheValue>> {
        self.ensure_ready()?;
        let raw = self.backend.hgetall(&self.aux_key(name)).await?;
        Ok(raw
            .into_iter()
            .map(|(field, value)| (field, self.codec.decode(&value)))
            .collect())
    }

    /// Append values to a list; returns the new length
    pub async fn list_push(&self, name: &str, values: &[CacheValue]) -> Result<u64> {
        self.ensure_ready()?;
        let encoded = values
            .iter()
            .map(|v| self.codec.encode(v, false))
            .collect::<Result<Vec<_>>>()?;
        self.backend.rpush(&self.aux_key(name), encoded).await
    }

    pub async fn list_range(&self, name: &str, start: i64, stop: i64) -> Result<Vec<CacheValue>> {
        self.ensure_ready()?;
        let raw = self.backend.lrange(&self.aux_key(name), start, stop).await?;
        Ok(raw.iter().map(|v| self.codec.decode(v)).collect())
    }

    pub async fn set_add(&self, name: &str, members: &[String]) -> Result<u64> {
        self.ensure_ready()?;
        self.backend.sadd(&self.aux_key(name), members).await
    }

    /// Set members, sorted
    pub async fn set_members(&self, name: &str) -> Result<Vec<String>> {
        self.ensure_ready()?;
        let mut members = self.backend.smembers(&self.aux_key(name)).await?;
        members.sort();
        Ok(members)
    }

    pub async fn sorted_set_add(&self, name: &str, member: &str, score: f64) -> Result<bool> {
        self.ensure_ready()?;
        self.backend.zadd(&self.aux_key(name), member, score).await
    }

    pub async fn sorted_set_range_by_score(
        &self,
        name: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<(String, f64)>> {
        self.ensure_ready()?;
        self.backend.zrangebyscore(&self.aux_key(name), min, max).await
    }

    pub async fn increment(&self, name: &str, delta: i64) -> Result<i64> {
        self.ensure_ready()?;
        self.backend.incr(&self.aux_key(name), delta).await
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStatistics {
        self.stats.snapshot(REMOTE_TIER)
    }

    /// Subscribe to connection and invalidation events
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for RemoteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCache")
            .field("backend", &self.backend.name())
            .field("key_prefix", &self.config.key_prefix)
            .field("ready", &self.is_ready())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::InMemoryRemoteBackend;
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use serde_json::json;

    fn fast_config() -> RemoteConfig {
        RemoteConfig {
            connect_timeout_ms: 500,
            initial_backoff_ms: 5,
            max_backoff_ms: 20,
            ..Default::default()
        }
    }

    async fn remote() -> (Arc<InMemoryRemoteBackend>, RemoteCache) {
        let backend = Arc::new(InMemoryRemoteBackend::new());
        let cache = RemoteCache::connect(backend.clone(), fast_config(), Duration::from_secs(3600))
            .await
            .unwrap();
        (backend, cache)
    }

    #[tokio::test]
    async fn test_not_ready_before_initialize() {
        let backend = Arc::new(InMemoryRemoteBackend::new());
        let cache = RemoteCache::new(
            backend,
            fast_config(),
            Duration::from_secs(60),
            Arc::new(TierCounters::new()),
        );
        assert_matches!(cache.get("k").await, Err(Error::BackendUnavailable(_)));
        cache.initialize().await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_initialize_retries_then_connects() {
        let backend = Arc::new(InMemoryRemoteBackend::new().with_failing_connects(2));
        let cache = RemoteCache::new(
            backend,
            fast_config(),
            Duration::from_secs(60),
            Arc::new(TierCounters::new()),
        );
        let mut events = cache.subscribe();
        cache.initialize().await.unwrap();

        assert_eq!(events.recv().await.unwrap().event_type(), "ConnectionRetry");
        assert_eq!(events.recv().await.unwrap().event_type(), "ConnectionRetry");
        assert_eq!(
            events.recv().await.unwrap(),
            CacheEvent::Connected {
                backend: "in-memory".into(),
                attempts: 3
            }
        );
    }

    #[tokio::test]
    async fn test_initialize_times_out() {
        let backend = Arc::new(InMemoryRemoteBackend::new());
        backend.set_available(false);
        let config = RemoteConfig {
            connect_timeout_ms: 50,
            ..fast_config()
        };
        let result = RemoteCache::connect(backend, config, Duration::from_secs(60)).await;
        assert_matches!(result, Err(Error::InitializationTimeout { timeout_ms: 50, .. }));
    }

    #[tokio::test]
    async fn test_get_set_delete_with_key_layout() {
        let (backend, cache) = remote().await;
        cache
            .set("user:1", &json!({"name": "Ada"}), &CacheOptions::new())
            .await
            .unwrap();
        assert!(backend.exists("cache:v:user:1").await.unwrap());
        assert_eq!(cache.get("user:1").await.unwrap(), Some(json!({"name": "Ada"})));

        assert!(cache.delete("user:1").await.unwrap());
        assert!(!cache.has("user:1").await.unwrap());
        assert!(cache.get("user:1").await.unwrap().is_none());

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.sets, stats.deletes), (1, 1, 1, 1));
    }

    #[tokio::test]
    async fn test_non_json_value_returned_as_string() {
        let (backend, cache) = remote().await;
        backend
            .set("cache:v:legacy", Bytes::from_static(b"not json"), None)
            .await
            .unwrap();
        assert_eq!(cache.get("legacy").await.unwrap(), Some(json!("not json")));
    }

    #[tokio::test]
    async fn test_ttl_policy() {
        let (_, cache) = remote().await;
        cache.set("default", &json!(1), &CacheOptions::new()).await.unwrap();
        cache.set("forever", &json!(1), &CacheOptions::new().persistent()).await.unwrap();

        assert_matches!(cache.ttl("default").await.unwrap(), KeyTtl::Expires(_));
        assert_eq!(cache.ttl("forever").await.unwrap(), KeyTtl::Persistent);
        assert_eq!(cache.ttl("missing").await.unwrap(), KeyTtl::Missing);

        assert!(cache.expire("forever", Duration::from_secs(30)).await.unwrap());
        assert_matches!(cache.ttl("forever").await.unwrap(), KeyTtl::Expires(_));
        assert!(cache.expire("forever", Duration::ZERO).await.unwrap());
        assert_eq!(cache.ttl("forever").await.unwrap(), KeyTtl::Persistent);
        assert!(!cache.expire("missing", Duration::ZERO).await.unwrap());
    }

    #[tokio::test]
    async fn test_tags_are_indexed_both_ways() {
        let (backend, cache) = remote().await;
        let opts = CacheOptions::new().with_tags(["users", "hot"]);
        cache.set("a", &json!(1), &opts).await.unwrap();
        cache.set("b", &json!(2), &CacheOptions::new().with_tag("users")).await.unwrap();

        assert_eq!(cache.get_by_tag("users").await.unwrap(), vec!["a", "b"]);
        assert_eq!(cache.entry_meta("a").await.unwrap().tags, vec!["hot", "users"]);
        assert_matches!(backend.ttl("cache:t:users").await.unwrap(), KeyTtl::Expires(_));

        assert_eq!(cache.invalidate_tag("users").await.unwrap(), 2);
        assert!(cache.get_by_tag("users").await.unwrap().is_empty());
        assert!(cache.get_by_tag("hot").await.unwrap().is_empty());
        assert!(!backend.exists("cache:k:a").await.unwrap());
    }

    #[tokio::test]
    async fn test_overwrite_relinks_tags() {
        let (_, cache) = remote().await;
        cache.set("a", &json!(1), &CacheOptions::new().with_tag("old")).await.unwrap();
        cache.set("a", &json!(2), &CacheOptions::new().with_tag("new")).await.unwrap();

        assert!(cache.get_by_tag("old").await.unwrap().is_empty());
        assert_eq!(cache.get_by_tag("new").await.unwrap(), vec!["a"]);
        assert_eq!(cache.entry_meta("a").await.unwrap().tags, vec!["new"]);
    }

    #[tokio::test]
    async fn test_keys_and_delete_pattern() {
        let (_, cache) = remote().await;
        for key in ["user:1", "user:abc", "users:1", "xuser:1"] {
            cache.set(key, &json!(key), &CacheOptions::new()).await.unwrap();
        }
        assert_eq!(cache.keys("user:*").await.unwrap(), vec!["user:1", "user:abc"]);
        assert_matches!(cache.keys("[oops").await, Err(Error::InvalidPattern { .. }));

        assert_eq!(cache.delete_pattern("user:*").await.unwrap(), 2);
        assert_eq!(cache.keys("*").await.unwrap(), vec!["users:1", "xuser:1"]);
    }

    #[tokio::test]
    async fn test_clear_only_touches_prefix() {
        let (backend, cache) = remote().await;
        backend.set("other:key", Bytes::from_static(b"1"), None).await.unwrap();
        cache.set("a", &json!(1), &CacheOptions::new().with_tag("t")).await.unwrap();
        cache.increment("counter", 1).await.unwrap();

        assert_eq!(cache.clear().await.unwrap(), 1);
        assert_eq!(backend.len(), 1);
        assert!(backend.exists("other:key").await.unwrap());
    }

    #[tokio::test]
    async fn test_auxiliary_structures() {
        let (backend, cache) = remote().await;

        assert!(cache.hash_set("profile", "name", &json!("Ada")).await.unwrap());
        assert_eq!(cache.hash_get("profile", "name").await.unwrap(), Some(json!("Ada")));
        assert_eq!(cache.hash_get_all("profile").await.unwrap().len(), 1);
        assert!(backend.exists("cache:x:profile").await.unwrap());

        assert_eq!(cache.list_push("log", &[json!(1), json!({"n": 2})]).await.unwrap(), 2);
        assert_eq!(cache.list_range("log", 0, -1).await.unwrap(), vec![json!(1), json!({"n": 2})]);

        assert_eq!(cache.set_add("members", &["x".into(), "y".into()]).await.unwrap(), 2);
        assert_eq!(cache.set_members("members").await.unwrap(), vec!["x", "y"]);

        cache.sorted_set_add("board", "ada", 10.0).await.unwrap();
        cache.sorted_set_add("board", "bob", 5.0).await.unwrap();
        assert_eq!(
            cache.sorted_set_range_by_score("board", 0.0, 100.0).await.unwrap(),
            vec![("bob".to_string(), 5.0), ("ada".to_string(), 10.0)]
        );

        assert_eq!(cache.increment("hits", 3).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let (backend, cache) = remote().await;
        backend.set_available(false);
        assert_matches!(cache.get("k").await, Err(Error::BackendUnavailable(_)));
        assert!(cache.ping().await.is_err());
    }
}
