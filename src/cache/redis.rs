//! Redis Remote Backend
//!
//! [`RemoteBackend`] implementation over a multiplexed Redis connection.
//! Only compiled with the `redis-backend` feature.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use redis::aio::MultiplexedConnection;
use tracing::{debug, info};

use super::backend::RemoteBackend;
use super::entry::KeyTtl;
use super::remote::RemoteConfig;
use crate::error::{Error, Result};

/// Keys requested per SCAN round-trip
const SCAN_COUNT: usize = 200;

/// Redis implementation of the remote backend
pub struct RedisBackend {
    client: redis::Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    endpoint: String,
}

impl RedisBackend {
    /// Create a client for the configured server; no I/O happens until
    /// [`RemoteBackend::connect`]
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let info = redis::ConnectionInfo {
            addr: redis::ConnectionAddr::Tcp(config.host.clone(), config.port),
            redis: redis::RedisConnectionInfo {
                db: config.db_index,
                password: config.password.clone(),
                ..Default::default()
            },
        };
        let client = redis::Client::open(info)?;
        Ok(Self {
            client,
            connection: RwLock::new(None),
            endpoint: format!("redis://{}:{}/{}", config.host, config.port, config.db_index),
        })
    }

    fn conn(&self) -> Result<MultiplexedConnection> {
        self.connection
            .read()
            .clone()
            .ok_or_else(|| Error::BackendUnavailable(format!("{} is not connected", self.endpoint)))
    }
}

#[async_trait]
impl RemoteBackend for RedisBackend {
    fn name(&self) -> &str {
        "redis"
    }

    async fn connect(&self) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        *self.connection.write() = Some(conn);
        info!(endpoint = %self.endpoint, "Redis backend connected");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn()?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut conn = self.conn()?;
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn()?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value.as_ref());
        if let Some(ttl) = ttl.filter(|t| !t.is_zero()) {
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let removed: u64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let found: bool = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(found)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn()?;
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();
        debug!(pattern = %pattern, count = keys.len(), "Scanned redis keys");
        Ok(keys)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn()?;
        let applied: bool = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await?;
        Ok(applied)
    }

    async fn persist(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let removed: bool = redis::cmd("PERSIST").arg(key).query_async(&mut conn).await?;
        Ok(removed)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        let mut conn = self.conn()?;
        let millis: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok(match millis {
            -2 => KeyTtl::Missing,
            -1 => KeyTtl::Persistent,
            ms => KeyTtl::Expires(Duration::from_millis(ms.max(0) as u64)),
        })
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn()?;
        let value: i64 = redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>> {
        let mut conn = self.conn()?;
        let value: Option<Vec<u8>> = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await?;
        Ok(value.map(Bytes::from))
    }

    async fn hset(&self, key: &str, field: &str, value: Bytes) -> Result<bool> {
        let mut conn = self.conn()?;
        let added: u64 = redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value.as_ref())
            .query_async(&mut conn)
            .await?;
        Ok(added > 0)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, Bytes>> {
        let mut conn = self.conn()?;
        let map: HashMap<String, Vec<u8>> = redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(map.into_iter().map(|(k, v)| (k, Bytes::from(v))).collect())
    }

    async fn rpush(&self, key: &str, values: Vec<Bytes>) -> Result<u64> {
        let mut conn = self.conn()?;
        let mut cmd = redis::cmd("RPUSH");
        cmd.arg(key);
        for value in &values {
            cmd.arg(value.as_ref());
        }
        let len: u64 = cmd.query_async(&mut conn).await?;
        Ok(len)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>> {
        let mut conn = self.conn()?;
        let values: Vec<Vec<u8>> = redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await?;
        Ok(values.into_iter().map(Bytes::from).collect())
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let added: u64 = redis::cmd("SADD")
            .arg(key)
            .arg(members)
            .query_async(&mut conn)
            .await?;
        Ok(added)
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let removed: u64 = redis::cmd("SREM")
            .arg(key)
            .arg(members)
            .query_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn()?;
        let members: Vec<String> = redis::cmd("SMEMBERS").arg(key).query_async(&mut conn).await?;
        Ok(members)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<bool> {
        let mut conn = self.conn()?;
        let added: u64 = redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(added > 0)
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<(String, f64)>> {
        let mut conn = self.conn()?;
        let members: Vec<(String, f64)> = redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg(min)
            .arg(max)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.connection.read().is_some())
            .finish()
    }
}
