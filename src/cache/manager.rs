//! Tiered Cache - Memory + Remote Coordination
//!
//! Composes the in-process tier with an optional remote tier.
//!
//! # Read Path
//!
//! ```text
//! get(key) ──▶ memory ──hit──▶ value
//!                │
//!               miss ──▶ remote ──hit──▶ value (+ promote into memory in Hybrid mode)
//!                          │
//!                         miss ──▶ None
//! ```
//!
//! # Write Path
//!
//! Writes always land in memory and, whenever a remote tier is configured,
//! in the remote tier as well. Fan-out operations (delete, clear, tag and
//! pattern invalidation) are not atomic across tiers: when a tier fails the
//! coordinator reports [`Error::PartialFailure`] with the count completed by
//! the tiers that succeeded.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::backend::RemoteBackend;
use super::entry::{CacheOptions, CacheValue, KeyTtl};
use super::health::{ComponentHealth, HealthReport};
use super::memory::{MemoryCache, MemoryCacheConfig};
use super::policy::EvictionStrategy;
use super::remote::{RemoteCache, RemoteConfig};
use super::stats::{CacheStatistics, StatsRegistry, MEMORY_TIER, REMOTE_TIER, TIERED};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Which tiers serve reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheProvider {
    /// In-process tier only
    #[default]
    Memory,
    /// Memory in front of a remote tier, no promotion
    Redis,
    /// Memory in front of a remote tier, remote hits promoted into memory
    Hybrid,
}

impl CacheProvider {
    /// True when the provider needs a remote tier
    pub fn uses_remote(&self) -> bool {
        !matches!(self, CacheProvider::Memory)
    }

    pub fn name(&self) -> &'static str {
        match self {
            CacheProvider::Memory => "memory",
            CacheProvider::Redis => "redis",
            CacheProvider::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for CacheProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for CacheProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(CacheProvider::Memory),
            "redis" => Ok(CacheProvider::Redis),
            "hybrid" => Ok(CacheProvider::Hybrid),
            other => Err(Error::Config(format!(
                "unknown cache provider '{}' (expected memory, redis or hybrid)",
                other
            ))),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL for writes without an explicit one (0 = never expires)
    pub default_ttl_seconds: u64,
    /// Memory tier capacity in entries (0 = unbounded)
    pub max_size: usize,
    /// Memory tier eviction strategy
    pub strategy: EvictionStrategy,
    pub provider: CacheProvider,
    /// Required for `redis` and `hybrid`
    pub remote: Option<RemoteConfig>,
    /// Probes slower than this report `Degraded`
    pub slow_probe_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 3600,
            max_size: 1000,
            strategy: EvictionStrategy::Lru,
            provider: CacheProvider::Memory,
            remote: None,
            slow_probe_ms: 250,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    pub fn memory_config(&self) -> MemoryCacheConfig {
        MemoryCacheConfig {
            max_size: self.max_size,
            default_ttl: self.default_ttl(),
            strategy: self.strategy,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.provider.uses_remote() && self.remote.is_none() {
            return Err(Error::Config(format!(
                "cache provider '{}' requires a remote section",
                self.provider
            )));
        }
        Ok(())
    }
}

fn partial(completed: u64, source: Error) -> Error {
    Error::PartialFailure {
        completed,
        source: Box::new(source),
    }
}

// =============================================================================
// Tiered Cache
// =============================================================================

/// Memory tier in front of an optional remote tier
pub struct TieredCache {
    memory: MemoryCache,
    remote: Option<RemoteCache>,
    config: CacheConfig,
    stats: Arc<StatsRegistry>,
}

impl TieredCache {
    /// Memory-only cache
    pub fn new(config: CacheConfig) -> Self {
        if config.provider.uses_remote() {
            warn!(provider = %config.provider, "No remote backend supplied, serving from memory only");
        }
        let stats = Arc::new(StatsRegistry::new());
        Self {
            memory: MemoryCache::with_stats(config.memory_config(), stats.counters(MEMORY_TIER)),
            remote: None,
            config,
            stats,
        }
    }

    /// Build the cache and connect the remote tier when the provider needs one
    pub async fn connect(config: CacheConfig, backend: Arc<dyn RemoteBackend>) -> Result<Self> {
        config.validate()?;
        if !config.provider.uses_remote() {
            return Ok(Self::new(config));
        }

        let stats = Arc::new(StatsRegistry::new());
        let remote_config = config.remote.clone().unwrap_or_default();
        let remote = RemoteCache::new(
            backend,
            remote_config,
            config.default_ttl(),
            stats.counters(REMOTE_TIER),
        );
        remote.initialize().await?;

        Ok(Self {
            memory: MemoryCache::with_stats(config.memory_config(), stats.counters(MEMORY_TIER)),
            remote: Some(remote),
            config,
            stats,
        })
    }

    /// Build from configuration, connecting to Redis when required
    #[cfg(feature = "redis-backend")]
    pub async fn from_config(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        match &config.remote {
            Some(remote) if config.provider.uses_remote() => {
                let backend = Arc::new(super::redis::RedisBackend::new(remote)?);
                Self::connect(config, backend).await
            }
            _ => Ok(Self::new(config)),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Look up a key in memory, then in the remote tier
    pub async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        let tiered = self.stats.counters(TIERED);

        if let Some(value) = self.memory.get(key) {
            tiered.record_hit();
            return Ok(Some(value));
        }

        let Some(remote) = &self.remote else {
            tiered.record_miss();
            return Ok(None);
        };

        match remote.get(key).await? {
            Some(value) => {
                if self.config.provider == CacheProvider::Hybrid {
                    self.promote(remote, key, &value).await;
                }
                tiered.record_hit();
                Ok(Some(value))
            }
            None => {
                tiered.record_miss();
                Ok(None)
            }
        }
    }

    /// Copy a remote hit into memory with its remaining TTL and tags
    async fn promote(&self, remote: &RemoteCache, key: &str, value: &CacheValue) {
        let options = match remote.entry_meta(key).await {
            Ok(meta) => match meta.ttl {
                // Expired between the read and the metadata lookup
                KeyTtl::Missing => return,
                ttl => CacheOptions {
                    ttl: ttl.as_write_ttl(),
                    tags: meta.tags,
                    ..Default::default()
                },
            },
            Err(e) => {
                debug!(key = %key, error = %e, "Promotion metadata unavailable, using defaults");
                CacheOptions::default()
            }
        };
        self.memory.set(key, value.clone(), &options);
        debug!(key = %key, "Promoted remote entry into memory");
    }

    /// True if any tier holds the key
    pub async fn has(&self, key: &str) -> Result<bool> {
        if self.memory.has(key) {
            return Ok(true);
        }
        match &self.remote {
            Some(remote) => remote.has(key).await,
            None => Ok(false),
        }
    }

    /// Several lookups; absent keys are omitted
    pub async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, CacheValue>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key).await? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    /// Return the cached value or load, store and return it
    pub async fn get_or_insert_with<F, Fut>(
        &self,
        key: &str,
        options: &CacheOptions,
        loader: F,
    ) -> Result<CacheValue>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheValue>>,
    {
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }
        let value = loader().await?;
        self.set(key, value.clone(), options).await?;
        Ok(value)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Write to memory and, when configured, the remote tier
    pub async fn set(&self, key: &str, value: CacheValue, options: &CacheOptions) -> Result<()> {
        self.memory.set(key, value.clone(), options);
        if let Some(remote) = &self.remote {
            remote.set(key, &value, options).await?;
        }
        self.stats.counters(TIERED).record_set();
        Ok(())
    }

    pub async fn set_many(&self, items: Vec<(String, CacheValue)>, options: &CacheOptions) -> Result<()> {
        for (key, value) in items {
            self.set(&key, value, options).await?;
        }
        Ok(())
    }

    /// Delete from every tier; true if any tier held the key
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let in_memory = self.memory.delete(key);
        let deleted = match &self.remote {
            Some(remote) => match remote.delete(key).await {
                Ok(in_remote) => in_memory || in_remote,
                Err(e) => return Err(partial(in_memory as u64, e)),
            },
            None => in_memory,
        };
        if deleted {
            self.stats.counters(TIERED).record_deletes(1);
        }
        Ok(deleted)
    }

    /// Delete several keys; returns how many were held by any tier
    pub async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        let mut count = 0;
        for key in keys {
            match self.delete(key).await {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(Error::PartialFailure { completed, source }) => {
                    return Err(partial(count + completed, *source))
                }
                Err(e) => return Err(partial(count, e)),
            }
        }
        Ok(count)
    }

    /// Empty every tier
    pub async fn clear(&self) -> Result<()> {
        let cleared = self.memory.clear();
        if let Some(remote) = &self.remote {
            remote.clear().await.map_err(|e| partial(cleared, e))?;
        }
        debug!(memory_entries = cleared, "Cleared tiered cache");
        Ok(())
    }

    // =========================================================================
    // Tags and patterns
    // =========================================================================

    /// Invalidate a tag in every tier; returns the summed count
    pub async fn invalidate_tag(&self, tag: &str) -> Result<u64> {
        let from_memory = self.memory.invalidate_tag(tag);
        let total = match &self.remote {
            Some(remote) => remote
                .invalidate_tag(tag)
                .await
                .map_err(|e| partial(from_memory, e))?
                + from_memory,
            None => from_memory,
        };
        self.stats.counters(TIERED).record_deletes(total);
        Ok(total)
    }

    pub async fn invalidate_tags(&self, tags: &[String]) -> Result<u64> {
        let mut total = 0;
        for tag in tags {
            match self.invalidate_tag(tag).await {
                Ok(count) => total += count,
                Err(Error::PartialFailure { completed, source }) => {
                    return Err(partial(total + completed, *source))
                }
                Err(e) => return Err(partial(total, e)),
            }
        }
        Ok(total)
    }

    /// Keys carrying `tag` in any tier, sorted and de-duplicated
    pub async fn get_by_tag(&self, tag: &str) -> Result<Vec<String>> {
        let mut keys: BTreeSet<String> = self.memory.get_by_tag(tag).into_iter().collect();
        if let Some(remote) = &self.remote {
            keys.extend(remote.get_by_tag(tag).await?);
        }
        Ok(keys.into_iter().collect())
    }

    /// Keys matching a glob in any tier, sorted and de-duplicated
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut keys: BTreeSet<String> = self.memory.keys(pattern)?.into_iter().collect();
        if let Some(remote) = &self.remote {
            keys.extend(remote.keys(pattern).await?);
        }
        Ok(keys.into_iter().collect())
    }

    /// Delete keys matching a glob in every tier; returns the summed count
    pub async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        // Invalid patterns fail here, before any tier is touched
        let from_memory = self.memory.delete_pattern(pattern)?;
        let total = match &self.remote {
            Some(remote) => remote
                .delete_pattern(pattern)
                .await
                .map_err(|e| partial(from_memory, e))?
                + from_memory,
            None => from_memory,
        };
        self.stats.counters(TIERED).record_deletes(total);
        Ok(total)
    }

    // =========================================================================
    // Statistics and health
    // =========================================================================

    /// Statistics for one tier, or every tier when `tier` is `None`
    pub fn get_stats(&self, tier: Option<&str>) -> Vec<CacheStatistics> {
        match tier {
            Some(name) => vec![self.stats.get(name)],
            None => {
                // Make sure the standard tiers are listed even before first use
                self.stats.counters(MEMORY_TIER);
                self.stats.counters(TIERED);
                if self.remote.is_some() {
                    self.stats.counters(REMOTE_TIER);
                }
                self.stats.all()
            }
        }
    }

    pub fn reset_stats(&self, tier: Option<&str>) {
        self.stats.reset(tier);
    }

    /// Probe every configured tier. Never fails; failures are reported in
    /// the returned report.
    pub async fn health_check(&self) -> HealthReport {
        let threshold = Duration::from_millis(self.config.slow_probe_ms);
        let mut components = Vec::with_capacity(2);

        let probe_key = format!("__health__:{}", Uuid::new_v4());
        let probe_value = serde_json::json!({ "probe": probe_key });
        let started = Instant::now();
        let memory = if self.memory.probe(&probe_key, &probe_value) {
            ComponentHealth::timed(MEMORY_TIER, started.elapsed(), threshold)
        } else {
            ComponentHealth::unhealthy(MEMORY_TIER, "probe value did not read back")
                .with_duration(started.elapsed())
        };
        components.push(memory);

        if let Some(remote) = &self.remote {
            let started = Instant::now();
            let health = match remote.ping().await {
                Ok(latency) => ComponentHealth::timed(REMOTE_TIER, latency, threshold),
                Err(e) => {
                    warn!(error = %e, "Remote cache health probe failed");
                    ComponentHealth::unhealthy(REMOTE_TIER, e.to_string())
                        .with_duration(started.elapsed())
                }
            };
            components.push(health);
        }

        HealthReport::new(components)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn memory(&self) -> &MemoryCache {
        &self.memory
    }

    pub fn remote(&self) -> Option<&RemoteCache> {
        self.remote.as_ref()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn provider(&self) -> CacheProvider {
        self.config.provider
    }
}

impl fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieredCache")
            .field("provider", &self.config.provider)
            .field("memory", &self.memory)
            .field("remote", &self.remote)
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
    use crate::cache::health::HealthStatus;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn remote_config() -> RemoteConfig {
        RemoteConfig {
            connect_timeout_ms: 500,
            initial_backoff_ms: 5,
            max_backoff_ms: 20,
            ..Default::default()
        }
    }

    async fn tiered(provider: CacheProvider) -> (Arc<InMemoryRemoteBackend>, TieredCache) {
        let backend = Arc::new(InMemoryRemoteBackend::new());
        let config = CacheConfig {
            provider,
            remote: Some(remote_config()),
            ..Default::default()
        };
        let cache = TieredCache::connect(config, backend.clone()).await.unwrap();
        (backend, cache)
    }

    #[tokio::test]
    async fn test_memory_only() {
        let cache = TieredCache::new(CacheConfig::default());
        assert!(cache.remote().is_none());
        cache.set("k", json!(1), &CacheOptions::new()).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!(1)));
        assert!(cache.get("missing").await.unwrap().is_none());

        let tiered = &cache.get_stats(Some(TIERED))[0];
        assert_eq!((tiered.hits, tiered.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_remote_provider_requires_config() {
        let config = CacheConfig {
            provider: CacheProvider::Hybrid,
            ..Default::default()
        };
        let result = TieredCache::connect(config, Arc::new(InMemoryRemoteBackend::new())).await;
        assert_matches!(result, Err(Error::Config(_)));
    }

    #[tokio::test]
    async fn test_write_through() {
        let (_, cache) = tiered(CacheProvider::Redis).await;
        cache.set("k", json!({"v": 1}), &CacheOptions::new()).await.unwrap();
        assert!(cache.memory().has("k"));
        assert!(cache.remote().unwrap().has("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_hybrid_promotes_remote_hits() {
        let (_, cache) = tiered(CacheProvider::Hybrid).await;
        let remote = cache.remote().unwrap();
        remote
            .set("k", &json!("remote"), &CacheOptions::new().with_tag("t").with_ttl_secs(120))
            .await
            .unwrap();
        assert!(!cache.memory().has("k"));

        assert_eq!(cache.get("k").await.unwrap(), Some(json!("remote")));
        let promoted = cache.memory().peek("k").unwrap();
        assert!(promoted.tags.contains("t"));
        assert!(promoted.expires_at.is_some());
        assert_matches!(cache.memory().ttl("k"), KeyTtl::Expires(d) if d.as_secs() <= 120);
    }

    #[tokio::test]
    async fn test_redis_provider_does_not_promote() {
        let (_, cache) = tiered(CacheProvider::Redis).await;
        cache
            .remote()
            .unwrap()
            .set("k", &json!(1), &CacheOptions::new())
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!(1)));
        assert!(!cache.memory().has("k"));
    }

    #[tokio::test]
    async fn test_persistent_remote_entry_promoted_without_expiry() {
        let (_, cache) = tiered(CacheProvider::Hybrid).await;
        cache
            .remote()
            .unwrap()
            .set("k", &json!(1), &CacheOptions::new().persistent())
            .await
            .unwrap();
        cache.get("k").await.unwrap();
        assert_eq!(cache.memory().ttl("k"), KeyTtl::Persistent);
    }

    #[tokio::test]
    async fn test_one_tiered_stat_per_get() {
        let (_, cache) = tiered(CacheProvider::Hybrid).await;
        cache.remote().unwrap().set("r", &json!(1), &CacheOptions::new()).await.unwrap();

        cache.get("r").await.unwrap(); // remote hit
        cache.get("r").await.unwrap(); // memory hit after promotion
        cache.get("none").await.unwrap(); // miss in both

        let stats = cache.get_stats(Some(TIERED)).remove(0);
        assert_eq!((stats.hits, stats.misses), (2, 1));
        let tiers: Vec<String> = cache.get_stats(None).into_iter().map(|s| s.tier).collect();
        assert_eq!(tiers, vec!["memory", "remote", "tiered"]);
    }

    #[tokio::test]
    async fn test_fan_out_delete_and_tags() {
        let (_, cache) = tiered(CacheProvider::Hybrid).await;
        let opts = CacheOptions::new().with_tag("group");
        cache.set("a", json!(1), &opts).await.unwrap();
        cache.set("b", json!(2), &opts).await.unwrap();

        assert!(cache.delete("a").await.unwrap());
        assert!(!cache.has("a").await.unwrap());

        // b lives in both tiers
        assert_eq!(cache.invalidate_tag("group").await.unwrap(), 2);
        assert!(cache.get_by_tag("group").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_reports_completed() {
        let (backend, cache) = tiered(CacheProvider::Redis).await;
        cache.set("a", json!(1), &CacheOptions::new().with_tag("t")).await.unwrap();
        backend.set_available(false);

        let err = cache.invalidate_tag("t").await.unwrap_err();
        assert_matches!(err, Error::PartialFailure { completed: 1, .. });
        assert!(!cache.memory().has("a"));
    }

    #[tokio::test]
    async fn test_delete_pattern_validates_first() {
        let (_, cache) = tiered(CacheProvider::Hybrid).await;
        cache.set("user:1", json!(1), &CacheOptions::new()).await.unwrap();
        assert_matches!(cache.delete_pattern("user:[").await, Err(Error::InvalidPattern { .. }));
        assert!(cache.has("user:1").await.unwrap());
        assert_eq!(cache.delete_pattern("user:*").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_get_or_insert_with() {
        let cache = TieredCache::new(CacheConfig::default());
        let loaded = cache
            .get_or_insert_with("k", &CacheOptions::new(), || async { Ok(json!("loaded")) })
            .await
            .unwrap();
        assert_eq!(loaded, json!("loaded"));

        let cached = cache
            .get_or_insert_with("k", &CacheOptions::new(), || async {
                Err(Error::Internal("loader must not run".into()))
            })
            .await
            .unwrap();
        assert_eq!(cached, json!("loaded"));
    }

    #[tokio::test]
    async fn test_health_check() {
        let (backend, cache) = tiered(CacheProvider::Hybrid).await;
        let report = cache.health_check().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.components.len(), 2);
        assert!(cache.memory().is_empty());

        backend.set_available(false);
        let report = cache.health_check().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.component("memory").unwrap().status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_reset_stats() {
        let cache = TieredCache::new(CacheConfig::default());
        cache.get("x").await.unwrap();
        cache.reset_stats(None);
        assert_eq!(cache.get_stats(Some(TIERED))[0].misses, 0);
    }
}
