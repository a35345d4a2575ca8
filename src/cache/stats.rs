//! Cache Statistics
//!
//! Per-tier counters keyed by tier name. Counters are created lazily the
//! first time a tier name is seen and are only reset by an explicit
//! [`StatsRegistry::reset`]. Rates are derived at read time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Tier name of the in-process cache
pub const MEMORY_TIER: &str = "memory";
/// Tier name of the remote cache
pub const REMOTE_TIER: &str = "remote";
/// Tier name of the coordinator's combined view
pub const TIERED: &str = "tiered";

/// Atomic counters for one tier
#[derive(Debug, Default)]
pub struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
}

impl TierCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deletes(&self, count: u64) {
        self.deletes.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self, tier: &str) -> CacheStatistics {
        CacheStatistics {
            tier: tier.to_string(),
            hits: self.hits(),
            misses: self.misses(),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }
}

/// Statistics snapshot for one tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub tier: String,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
}

impl CacheStatistics {
    /// `hits / (hits + misses)`, 0.0 before the first lookup
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// `misses / (hits + misses)`, 0.0 before the first lookup
    pub fn miss_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.misses as f64 / total as f64
        }
    }

    /// Total lookups
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }
}

/// Registry of per-tier counters
#[derive(Debug, Default)]
pub struct StatsRegistry {
    tiers: DashMap<String, Arc<TierCounters>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters for `tier`, created on first use
    pub fn counters(&self, tier: &str) -> Arc<TierCounters> {
        if let Some(existing) = self.tiers.get(tier) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.tiers
                .entry(tier.to_string())
                .or_insert_with(|| Arc::new(TierCounters::new()))
                .value(),
        )
    }

    /// Snapshot for one tier
    pub fn get(&self, tier: &str) -> CacheStatistics {
        self.counters(tier).snapshot(tier)
    }

    /// Snapshots for every known tier, ordered by tier name
    pub fn all(&self) -> Vec<CacheStatistics> {
        let mut stats: Vec<CacheStatistics> = self
            .tiers
            .iter()
            .map(|entry| entry.value().snapshot(entry.key()))
            .collect();
        stats.sort_by(|a, b| a.tier.cmp(&b.tier));
        stats
    }

    /// Reset one tier, or all tiers when `tier` is `None`
    pub fn reset(&self, tier: Option<&str>) {
        match tier {
            Some(name) => {
                if let Some(counters) = self.tiers.get(name) {
                    counters.reset();
                }
            }
            None => self.tiers.iter().for_each(|entry| entry.value().reset()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
