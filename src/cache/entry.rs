//! Cache Entry Types
//!
//! Values, per-call write options and the bookkeeping each tier keeps per key.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Value stored in either tier.
///
/// Values cross the tier boundary by copy; the remote tier encodes them with
/// [`ValueCodec`](super::codec::ValueCodec).
pub type CacheValue = serde_json::Value;

/// Per-call write options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Time to live. `None` uses the tier default, zero never expires.
    pub ttl: Option<Duration>,
    /// Tags used for bulk invalidation
    pub tags: Vec<String>,
    /// Caller-assigned priority (informational)
    pub priority: i32,
    /// Ask the remote codec to compress the encoded value
    pub compressed: bool,
}

impl CacheOptions {
    /// Options with every field at its default
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an explicit TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set an explicit TTL in seconds
    pub fn with_ttl_secs(self, secs: u64) -> Self {
        self.with_ttl(Duration::from_secs(secs))
    }

    /// Never expire, regardless of the tier default
    pub fn persistent(self) -> Self {
        self.with_ttl(Duration::ZERO)
    }

    /// Add one tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Add several tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Request compression of the encoded value
    pub fn compressed(mut self) -> Self {
        self.compressed = true;
        self
    }
}

/// Resolve the effective TTL of a write.
///
/// `None` falls back to `default_ttl`; a zero result means "never expires"
/// and is returned as `None`.
pub fn effective_ttl(ttl: Option<Duration>, default_ttl: Duration) -> Option<Duration> {
    let ttl = ttl.unwrap_or(default_ttl);
    if ttl.is_zero() {
        None
    } else {
        Some(ttl)
    }
}

/// Absolute expiry for a write made at `now`.
pub fn expiry_at(
    ttl: Option<Duration>,
    default_ttl: Duration,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    effective_ttl(ttl, default_ttl)
        .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
        .and_then(|ttl| now.checked_add_signed(ttl))
}

/// Remaining lifetime of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key does not exist (or already expired)
    Missing,
    /// Key exists without expiration
    Persistent,
    /// Key expires after the given duration
    Expires(Duration),
}

impl KeyTtl {
    /// Convert to a write TTL that reproduces the same expiry
    pub fn as_write_ttl(&self) -> Option<Duration> {
        match self {
            KeyTtl::Missing => None,
            KeyTtl::Persistent => Some(Duration::ZERO),
            KeyTtl::Expires(remaining) => Some(*remaining),
        }
    }
}

/// Entry held by the in-process tier
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Cache key
    pub key: String,
    /// Cached value
    pub value: CacheValue,
    /// Absolute expiry, `None` = never expires
    pub expires_at: Option<DateTime<Utc>>,
    /// Insertion time
    pub created_at: DateTime<Utc>,
    /// Last read time
    pub last_accessed_at: DateTime<Utc>,
    /// Number of reads since insertion
    pub access_count: u64,
    /// Tags attached at write time
    pub tags: HashSet<String>,
    /// Caller-assigned priority
    pub priority: i32,
    /// Insertion order within the owning cache
    pub(crate) sequence: u64,
    /// Logical clock value of the last read or write
    pub(crate) last_access_tick: u64,
}

impl CacheEntry {
    pub(crate) fn new(
        key: String,
        value: CacheValue,
        expires_at: Option<DateTime<Utc>>,
        options: &CacheOptions,
        sequence: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            value,
            expires_at,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            tags: options.tags.iter().cloned().collect(),
            priority: options.priority,
            sequence,
            last_access_tick: sequence,
        }
    }

    /// Check expiry against a given instant
    #[inline]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    /// Check expiry against the current time
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Remaining lifetime at `now`
    pub fn ttl_at(&self, now: DateTime<Utc>) -> KeyTtl {
        match self.expires_at {
            None => KeyTtl::Persistent,
            Some(at) if at <= now => KeyTtl::Missing,
            Some(at) => KeyTtl::Expires((at - now).to_std().unwrap_or_default()),
        }
    }

    /// Insertion order
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    #[inline]
    pub(crate) fn record_access(&mut self, tick: u64, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_access_tick = tick;
        self.last_accessed_at = now;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(key: &str, expires_at: Option<DateTime<Utc>>) -> CacheEntry {
        CacheEntry::new(
            key.to_string(),
            json!(1),
            expires_at,
            &CacheOptions::new().with_tag("t"),
            7,
            Utc::now(),
        )
    }

    #[test]
    fn test_effective_ttl_defaults() {
        let default = Duration::from_secs(60);
        assert_eq!(effective_ttl(None, default), Some(default));
        assert_eq!(
            effective_ttl(Some(Duration::from_secs(5)), default),
            Some(Duration::from_secs(5))
        );
        // Explicit zero never expires, even with a default configured
        assert_eq!(effective_ttl(Some(Duration::ZERO), default), None);
        // Zero default never expires
        assert_eq!(effective_ttl(None, Duration::ZERO), None);
    }

    #[test]
    fn test_expiry_at() {
        let now = Utc::now();
        let at = expiry_at(Some(Duration::from_secs(10)), Duration::ZERO, now).unwrap();
        assert_eq!((at - now).num_seconds(), 10);
        assert!(expiry_at(Some(Duration::ZERO), Duration::from_secs(5), now).is_none());
    }

    #[test]
    fn test_entry_expiry() {
        let now = Utc::now();
        let never = entry("a", None);
        assert!(!never.is_expired_at(now));
        assert_eq!(never.ttl_at(now), KeyTtl::Persistent);

        let past = entry("b", Some(now - chrono::Duration::seconds(1)));
        assert!(past.is_expired_at(now));
        assert_eq!(past.ttl_at(now), KeyTtl::Missing);

        let future = entry("c", Some(now + chrono::Duration::seconds(30)));
        assert!(!future.is_expired_at(now));
        match future.ttl_at(now) {
            KeyTtl::Expires(left) => assert!(left.as_secs() >= 29),
            other => panic!("unexpected ttl {:?}", other),
        }
    }

    #[test]
    fn test_entry_access_tracking() {
        let mut e = entry("k", None);
        assert_eq!(e.access_count, 0);
        assert_eq!(e.last_access_tick, 7);
        assert!(e.tags.contains("t"));

        e.record_access(42, Utc::now());
        e.record_access(43, Utc::now());
        assert_eq!(e.access_count, 2);
        assert_eq!(e.last_access_tick, 43);
        assert_eq!(e.sequence(), 7);
    }

    #[test]
    fn test_key_ttl_as_write_ttl() {
        assert_eq!(KeyTtl::Persistent.as_write_ttl(), Some(Duration::ZERO));
        assert_eq!(
            KeyTtl::Expires(Duration::from_secs(3)).as_write_ttl(),
            Some(Duration::from_secs(3))
        );
        assert_eq!(KeyTtl::Missing.as_write_ttl(), None);
    }

    #[test]
    fn test_options_builder() {
        let opts = CacheOptions::new()
            .with_ttl_secs(5)
            .with_tags(["a", "b"])
            .with_priority(3)
            .compressed();
        assert_eq!(opts.ttl, Some(Duration::from_secs(5)));
        assert_eq!(opts.tags, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(opts.priority, 3);
        assert!(opts.compressed);
        assert_eq!(CacheOptions::new().persistent().ttl, Some(Duration::ZERO));
    }
}
