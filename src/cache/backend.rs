//! Remote Backend Port
//!
//! [`RemoteBackend`] is the command surface the remote cache adapter needs
//! from a key-value server: plain keys with expiry, counters, and the hash,
//! list, set and sorted-set structures. Keys passed in are fully qualified;
//! the adapter owns the key layout.
//!
//! [`InMemoryRemoteBackend`] implements the port on `DashMap` for tests and
//! single-process deployments. It can be switched offline to exercise
//! failure paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::entry::KeyTtl;
use super::pattern::GlobPattern;
use crate::error::{Error, Result};

/// Key-value server commands used by the remote tier
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Backend name for logs and health reports
    fn name(&self) -> &str;

    /// Establish the connection; called repeatedly until it succeeds
    async fn connect(&self) -> Result<()>;

    /// Round-trip check
    async fn ping(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store a value; `None` keeps it without expiry
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()>;

    /// Delete keys, returning how many existed
    async fn del(&self, keys: &[String]) -> Result<u64>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Keys matching a glob pattern
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Set a key's expiry; false if the key does not exist
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remove a key's expiry; false if the key does not exist or had none
    async fn persist(&self, key: &str) -> Result<bool>;

    async fn ttl(&self, key: &str) -> Result<KeyTtl>;

    /// Add `delta` to an integer counter, creating it at zero
    async fn incr(&self, key: &str, delta: i64) -> Result<i64>;

    // Hashes
    async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>>;
    /// True when the field was newly created
    async fn hset(&self, key: &str, field: &str, value: Bytes) -> Result<bool>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, Bytes>>;

    // Lists
    /// Append values, returning the new length
    async fn rpush(&self, key: &str, values: Vec<Bytes>) -> Result<u64>;
    /// Inclusive range; negative indexes count from the end
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>>;

    // Sets
    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64>;
    async fn srem(&self, key: &str, members: &[String]) -> Result<u64>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    // Sorted sets
    /// True when the member was newly added
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<bool>;
    /// Members with `min <= score <= max`, ascending by score
    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<(String, f64)>>;
}

// =============================================================================
// In-Memory Backend
// =============================================================================

#[derive(Debug, Clone)]
enum StoredValue {
    Bytes(Bytes),
    Hash(HashMap<String, Bytes>),
    List(Vec<Bytes>),
    Set(HashSet<String>),
    SortedSet(HashMap<String, f64>),
}

impl StoredValue {
    fn kind(&self) -> &'static str {
        match self {
            StoredValue::Bytes(_) => "string",
            StoredValue::Hash(_) => "hash",
            StoredValue::List(_) => "list",
            StoredValue::Set(_) => "set",
            StoredValue::SortedSet(_) => "zset",
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl Slot {
    fn new(value: StoredValue) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

fn wrong_type(key: &str, found: &StoredValue) -> Error {
    Error::Remote(format!(
        "WRONGTYPE key {} holds a {} value",
        key,
        found.kind()
    ))
}

/// In-process remote backend
#[derive(Debug)]
pub struct InMemoryRemoteBackend {
    data: DashMap<String, Slot>,
    available: AtomicBool,
    failing_connects: AtomicU32,
    commands: AtomicU64,
}

impl Default for InMemoryRemoteBackend {
    fn default() -> Self {
        Self {
            data: DashMap::new(),
            available: AtomicBool::new(true),
            failing_connects: AtomicU32::new(0),
            commands: AtomicU64::new(0),
        }
    }
}

impl InMemoryRemoteBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the first `attempts` connection attempts
    pub fn with_failing_connects(self, attempts: u32) -> Self {
        self.failing_connects.store(attempts, Ordering::SeqCst);
        self
    }

    /// Take the backend offline (every command fails) or back online
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Commands served so far
    pub fn command_count(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.data.iter().filter(|e| !e.value().is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<()> {
        self.commands.fetch_add(1, Ordering::Relaxed);
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::BackendUnavailable(
                "in-memory backend is offline".to_string(),
            ))
        }
    }

    fn purge_if_expired(&self, key: &str) {
        let now = Instant::now();
        self.data.remove_if(key, |_, slot| slot.is_expired(now));
    }

    /// Mutate the structure at `key`, creating it with `init` when absent
    fn with_slot<T>(
        &self,
        key: &str,
        init: fn() -> StoredValue,
        f: impl FnOnce(&mut StoredValue) -> Result<T>,
    ) -> Result<T> {
        self.purge_if_expired(key);
        let mut slot = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Slot::new(init()));
        f(&mut slot.value)
    }

    /// Read the structure at `key` if present
    fn read_slot<T>(&self, key: &str, f: impl FnOnce(&StoredValue) -> Result<T>) -> Result<Option<T>> {
        self.purge_if_expired(key);
        match self.data.get(key) {
            Some(slot) => f(&slot.value).map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RemoteBackend for InMemoryRemoteBackend {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn connect(&self) -> Result<()> {
        let remaining = self.failing_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::BackendUnavailable("connection refused".to_string()));
        }
        self.check()
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.check()?;
        self.read_slot(key, |value| match value {
            StoredValue::Bytes(bytes) => Ok(bytes.clone()),
            other => Err(wrong_type(key, other)),
        })
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.check()?;
        let expires_at = ttl.filter(|t| !t.is_zero()).map(|t| Instant::now() + t);
        self.data.insert(
            key.to_string(),
            Slot {
                value: StoredValue::Bytes(value),
                expires_at,
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        self.check()?;
        let now = Instant::now();
        Ok(keys
            .iter()
            .filter_map(|key| self.data.remove(key))
            .filter(|(_, slot)| !slot.is_expired(now))
            .count() as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check()?;
        self.purge_if_expired(key);
        Ok(self.data.contains_key(key))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check()?;
        let glob = GlobPattern::new(pattern)?;
        let now = Instant::now();
        Ok(self
            .data
            .iter()
            .filter(|e| !e.value().is_expired(now) && glob.matches(e.key()))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check()?;
        self.purge_if_expired(key);
        match self.data.get_mut(key) {
            Some(mut slot) => {
                slot.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn persist(&self, key: &str) -> Result<bool> {
        self.check()?;
        self.purge_if_expired(key);
        match self.data.get_mut(key) {
            Some(mut slot) => Ok(slot.expires_at.take().is_some()),
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        self.check()?;
        self.purge_if_expired(key);
        let now = Instant::now();
        Ok(match self.data.get(key) {
            None => KeyTtl::Missing,
            Some(slot) => match slot.expires_at {
                None => KeyTtl::Persistent,
                Some(at) => KeyTtl::Expires(at.saturating_duration_since(now)),
            },
        })
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        self.check()?;
        self.with_slot(
            key,
            || StoredValue::Bytes(Bytes::from_static(b"0")),
            |value| match value {
                StoredValue::Bytes(bytes) => {
                    let current: i64 = std::str::from_utf8(bytes)
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| {
                            Error::Remote(format!("value at {} is not an integer", key))
                        })?;
                    let next = current.checked_add(delta).ok_or_else(|| {
                        Error::Remote(format!("increment of {} would overflow", key))
                    })?;
                    *bytes = Bytes::from(next.to_string());
                    Ok(next)
                }
                other => Err(wrong_type(key, other)),
            },
        )
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>> {
        self.check()?;
        Ok(self
            .read_slot(key, |value| match value {
                StoredValue::Hash(map) => Ok(map.get(field).cloned()),
                other => Err(wrong_type(key, other)),
            })?
            .flatten())
    }

    async fn hset(&self, key: &str, field: &str, value: Bytes) -> Result<bool> {
        self.check()?;
        self.with_slot(
            key,
            || StoredValue::Hash(HashMap::new()),
            |stored| match stored {
                StoredValue::Hash(map) => Ok(map.insert(field.to_string(), value).is_none()),
                other => Err(wrong_type(key, other)),
            },
        )
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, Bytes>> {
        self.check()?;
        Ok(self
            .read_slot(key, |value| match value {
                StoredValue::Hash(map) => Ok(map.clone()),
                other => Err(wrong_type(key, other)),
            })?
            .unwrap_or_default())
    }

    async fn rpush(&self, key: &str, values: Vec<Bytes>) -> Result<u64> {
        self.check()?;
        self.with_slot(
            key,
            || StoredValue::List(Vec::new()),
            |stored| match stored {
                StoredValue::List(list) => {
                    list.extend(values);
                    Ok(list.len() as u64)
                }
                other => Err(wrong_type(key, other)),
            },
        )
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>> {
        self.check()?;
        Ok(self
            .read_slot(key, |value| match value {
                StoredValue::List(list) => {
                    let len = list.len() as i64;
                    let start = if start < 0 { (len + start).max(0) } else { start };
                    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
                    if len == 0 || start > stop || start >= len {
                        return Ok(Vec::new());
                    }
                    Ok(list[start as usize..=stop as usize].to_vec())
                }
                other => Err(wrong_type(key, other)),
            })?
            .unwrap_or_default())
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64> {
        self.check()?;
        self.with_slot(
            key,
            || StoredValue::Set(HashSet::new()),
            |stored| match stored {
                StoredValue::Set(set) => Ok(members
                    .iter()
                    .filter(|m| set.insert((*m).clone()))
                    .count() as u64),
                other => Err(wrong_type(key, other)),
            },
        )
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<u64> {
        self.check()?;
        self.purge_if_expired(key);
        let (removed, now_empty) = match self.data.get_mut(key) {
            None => return Ok(0),
            Some(mut slot) => match &mut slot.value {
                StoredValue::Set(set) => {
                    let removed = members.iter().filter(|m| set.remove(m.as_str())).count() as u64;
                    (removed, set.is_empty())
                }
                other => return Err(wrong_type(key, other)),
            },
        };
        // Empty sets do not exist
        if now_empty {
            self.data.remove(key);
        }
        Ok(removed)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.check()?;
        Ok(self
            .read_slot(key, |value| match value {
                StoredValue::Set(set) => Ok(set.iter().cloned().collect()),
                other => Err(wrong_type(key, other)),
            })?
            .unwrap_or_default())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<bool> {
        self.check()?;
        self.with_slot(
            key,
            || StoredValue::SortedSet(HashMap::new()),
            |stored| match stored {
                StoredValue::SortedSet(zset) => Ok(zset.insert(member.to_string(), score).is_none()),
                other => Err(wrong_type(key, other)),
            },
        )
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<(String, f64)>> {
        self.check()?;
        Ok(self
            .read_slot(key, |value| match value {
                StoredValue::SortedSet(zset) => {
                    let mut members: Vec<(String, f64)> = zset
                        .iter()
                        .filter(|(_, score)| **score >= min && **score <= max)
                        .map(|(member, score)| (member.clone(), *score))
                        .collect();
                    members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
                    Ok(members)
                }
                other => Err(wrong_type(key, other)),
            })?
            .unwrap_or_default())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[tokio::test]
    async fn test_in_memory_backend_get_set_del() {
        let backend = InMemoryRemoteBackend::new();
        backend.set("k", b("v"), None).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b("v")));
        assert!(backend.exists("k").await.unwrap());

        assert_eq!(backend.del(&["k".into(), "missing".into()]).await.unwrap(), 1);
        assert!(backend.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_backend_expiry() {
        let backend = InMemoryRemoteBackend::new();
        backend
            .set("k", b("v"), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_matches!(backend.ttl("k").await.unwrap(), KeyTtl::Expires(_));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(backend.get("k").await.unwrap().is_none());
        assert_eq!(backend.ttl("k").await.unwrap(), KeyTtl::Missing);
    }

    #[tokio::test]
    async fn test_in_memory_backend_persist() {
        let backend = InMemoryRemoteBackend::new();
        backend.set("k", b("v"), Some(Duration::from_secs(60))).await.unwrap();
        assert!(backend.persist("k").await.unwrap());
        assert_eq!(backend.ttl("k").await.unwrap(), KeyTtl::Persistent);
        assert!(!backend.persist("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_in_memory_backend_keys() {
        let backend = InMemoryRemoteBackend::new();
        for key in ["c:v:user:1", "c:v:user:2", "c:t:user"] {
            backend.set(key, b("x"), None).await.unwrap();
        }
        let mut keys = backend.keys("c:v:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["c:v:user:1".to_string(), "c:v:user:2".to_string()]);
    }

    #[tokio::test]
    async fn test_in_memory_backend_incr() {
        let backend = InMemoryRemoteBackend::new();
        assert_eq!(backend.incr("n", 5).await.unwrap(), 5);
        assert_eq!(backend.incr("n", -2).await.unwrap(), 3);

        backend.set("s", b("abc"), None).await.unwrap();
        assert_matches!(backend.incr("s", 1).await, Err(Error::Remote(_)));
    }

    #[tokio::test]
    async fn test_in_memory_backend_structures() {
        let backend = InMemoryRemoteBackend::new();

        assert!(backend.hset("h", "f", b("1")).await.unwrap());
        assert!(!backend.hset("h", "f", b("2")).await.unwrap());
        assert_eq!(backend.hget("h", "f").await.unwrap(), Some(b("2")));
        assert_eq!(backend.hgetall("h").await.unwrap().len(), 1);

        assert_eq!(backend.rpush("l", vec![b("a"), b("b"), b("c")]).await.unwrap(), 3);
        assert_eq!(backend.lrange("l", 0, -1).await.unwrap(), vec![b("a"), b("b"), b("c")]);
        assert_eq!(backend.lrange("l", -2, -1).await.unwrap(), vec![b("b"), b("c")]);
        assert!(backend.lrange("l", 5, 10).await.unwrap().is_empty());

        assert_eq!(backend.sadd("s", &["x".into(), "y".into(), "x".into()]).await.unwrap(), 2);
        assert_eq!(backend.srem("s", &["x".into()]).await.unwrap(), 1);
        assert_eq!(backend.smembers("s").await.unwrap(), vec!["y".to_string()]);
        assert_eq!(backend.srem("s", &["y".into()]).await.unwrap(), 1);
        assert!(!backend.exists("s").await.unwrap());

        backend.zadd("z", "b", 2.0).await.unwrap();
        backend.zadd("z", "a", 1.0).await.unwrap();
        backend.zadd("z", "c", 3.0).await.unwrap();
        assert_eq!(
            backend.zrangebyscore("z", 1.0, 2.0).await.unwrap(),
            vec![("a".to_string(), 1.0), ("b".to_string(), 2.0)]
        );
    }

    #[tokio::test]
    async fn test_in_memory_backend_wrong_type() {
        let backend = InMemoryRemoteBackend::new();
        backend.sadd("s", &["x".into()]).await.unwrap();
        assert_matches!(backend.get("s").await, Err(Error::Remote(msg)) if msg.contains("WRONGTYPE"));
    }

    #[tokio::test]
    async fn test_in_memory_backend_offline() {
        let backend = InMemoryRemoteBackend::new();
        backend.set_available(false);
        assert_matches!(backend.ping().await, Err(Error::BackendUnavailable(_)));
        assert_matches!(backend.get("k").await, Err(Error::BackendUnavailable(_)));
        backend.set_available(true);
        assert!(backend.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_in_memory_backend_failing_connects() {
        let backend = InMemoryRemoteBackend::new().with_failing_connects(2);
        assert!(backend.connect().await.is_err());
        assert!(backend.connect().await.is_err());
        assert!(backend.connect().await.is_ok());
    }
}
