//! Cache Eviction Policies
//!
//! Victim selection for the bounded in-process tier. Exactly one victim is
//! chosen per over-capacity insert; ties are broken by insertion order so the
//! earliest-inserted candidate goes first.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::entry::CacheEntry;
use crate::error::{Error, Result};

/// Eviction strategy for the in-process tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionStrategy {
    /// Least recently accessed entry
    #[default]
    Lru,
    /// Lowest access count
    Lfu,
    /// Oldest insertion
    Fifo,
    /// Nearest expiry; entries without expiry are never chosen
    Ttl,
}

impl EvictionStrategy {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            EvictionStrategy::Lru => "lru",
            EvictionStrategy::Lfu => "lfu",
            EvictionStrategy::Fifo => "fifo",
            EvictionStrategy::Ttl => "ttl",
        }
    }

    /// Pick the entry to evict, or `None` when there is nothing to evict.
    ///
    /// `Ttl` falls back to FIFO order when no candidate carries an expiry.
    pub fn select_victim<'a, I>(&self, entries: I) -> Option<&'a CacheEntry>
    where
        I: IntoIterator<Item = &'a CacheEntry>,
    {
        match self {
            EvictionStrategy::Lru => entries
                .into_iter()
                .min_by_key(|e| (e.last_access_tick, e.sequence)),
            EvictionStrategy::Lfu => entries
                .into_iter()
                .min_by_key(|e| (e.access_count, e.sequence)),
            EvictionStrategy::Fifo => entries.into_iter().min_by_key(|e| e.sequence),
            EvictionStrategy::Ttl => {
                let mut soonest: Option<&'a CacheEntry> = None;
                let mut oldest: Option<&'a CacheEntry> = None;
                for entry in entries {
                    if oldest.map_or(true, |o| entry.sequence < o.sequence) {
                        oldest = Some(entry);
                    }
                    if let Some(at) = entry.expires_at {
                        let better = match soonest.and_then(|s| s.expires_at.map(|t| (t, s))) {
                            None => true,
                            Some((t, s)) => (at, entry.sequence) < (t, s.sequence),
                        };
                        if better {
                            soonest = Some(entry);
                        }
                    }
                }
                soonest.or(oldest)
            }
        }
    }
}

impl fmt::Display for EvictionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for EvictionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionStrategy::Lru),
            "lfu" => Ok(EvictionStrategy::Lfu),
            "fifo" => Ok(EvictionStrategy::Fifo),
            "ttl" => Ok(EvictionStrategy::Ttl),
            other => Err(Error::Config(format!(
                "unknown eviction strategy '{}' (expected lru, lfu, fifo or ttl)",
                other
            ))),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::CacheOptions;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn entry(key: &str, sequence: u64) -> CacheEntry {
        CacheEntry::new(
            key.to_string(),
            json!(key),
            None,
            &CacheOptions::new(),
            sequence,
            Utc::now(),
        )
    }

    #[test]
    fn test_empty_has_no_victim() {
        for strategy in [
            EvictionStrategy::Lru,
            EvictionStrategy::Lfu,
            EvictionStrategy::Fifo,
            EvictionStrategy::Ttl,
        ] {
            assert!(strategy.select_victim(std::iter::empty()).is_none());
        }
    }

    #[test]
    fn test_lru_picks_oldest_access() {
        let mut a = entry("a", 1);
        let b = entry("b", 2);
        let c = entry("c", 3);
        a.record_access(10, Utc::now());

        let entries = [a, b, c];
        let victim = EvictionStrategy::Lru.select_victim(entries.iter()).unwrap();
        assert_eq!(victim.key, "b");
    }

    #[test]
    fn test_lfu_breaks_ties_by_insertion() {
        let mut a = entry("a", 1);
        let b = entry("b", 2);
        let c = entry("c", 3);
        a.record_access(4, Utc::now());

        let entries = [c, b, a];
        let victim = EvictionStrategy::Lfu.select_victim(entries.iter()).unwrap();
        assert_eq!(victim.key, "b");
    }

    #[test]
    fn test_fifo_ignores_access() {
        let mut a = entry("a", 1);
        a.record_access(99, Utc::now());
        let b = entry("b", 2);

        let entries = [b, a];
        let victim = EvictionStrategy::Fifo.select_victim(entries.iter()).unwrap();
        assert_eq!(victim.key, "a");
    }

    #[test]
    fn test_ttl_prefers_nearest_expiry() {
        let now = Utc::now();
        let never = entry("never", 1);
        let mut late = entry("late", 2);
        late.expires_at = Some(now + Duration::seconds(100));
        let mut soon = entry("soon", 3);
        soon.expires_at = Some(now + Duration::seconds(5));

        let entries = [never, late, soon];
        let victim = EvictionStrategy::Ttl.select_victim(entries.iter()).unwrap();
        assert_eq!(victim.key, "soon");
    }

    #[test]
    fn test_ttl_falls_back_to_fifo() {
        let entries = [entry("b", 2), entry("a", 1)];
        let victim = EvictionStrategy::Ttl.select_victim(entries.iter()).unwrap();
        assert_eq!(victim.key, "a");
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("LRU".parse::<EvictionStrategy>().unwrap(), EvictionStrategy::Lru);
        assert_eq!("fifo".parse::<EvictionStrategy>().unwrap(), EvictionStrategy::Fifo);
        assert!("random".parse::<EvictionStrategy>().is_err());
        assert_eq!(EvictionStrategy::Ttl.to_string(), "ttl");
    }
}
