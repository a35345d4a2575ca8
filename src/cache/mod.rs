//! Two-Tier Cache
//!
//! A bounded in-process tier ([`MemoryCache`]) in front of an optional
//! remote key-value tier ([`RemoteCache`]), coordinated by [`TieredCache`].
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                 TieredCache                   │
//! │   read: memory → remote (→ promote, hybrid)   │
//! │   write: memory + remote (write-through)      │
//! └───────────────┬───────────────────┬───────────┘
//!                 │                   │
//!        ┌────────▼───────┐  ┌────────▼────────┐
//!        │  MemoryCache   │  │  RemoteCache    │
//!        │  LRU/LFU/FIFO/ │  │  key layout,    │
//!        │  TTL, tags     │  │  codec, tags    │
//!        └────────────────┘  └────────┬────────┘
//!                                     │ RemoteBackend
//!                          ┌──────────┴──────────┐
//!                          │ InMemory │  Redis   │
//!                          └─────────────────────┘
//! ```

pub mod backend;
pub mod codec;
pub mod entry;
pub mod events;
pub mod health;
pub mod manager;
pub mod memory;
pub mod pattern;
pub mod policy;
#[cfg(feature = "redis-backend")]
pub mod redis;
pub mod remote;
pub mod stats;

pub use backend::{InMemoryRemoteBackend, RemoteBackend};
pub use codec::{CodecConfig, ValueCodec};
pub use entry::{CacheEntry, CacheOptions, CacheValue, KeyTtl};
pub use events::CacheEvent;
pub use health::{ComponentHealth, HealthReport, HealthStatus};
pub use manager::{CacheConfig, CacheProvider, TieredCache};
pub use memory::{MemoryCache, MemoryCacheConfig};
pub use pattern::GlobPattern;
pub use policy::EvictionStrategy;
#[cfg(feature = "redis-backend")]
pub use self::redis::RedisBackend;
pub use remote::{RemoteCache, RemoteConfig, RemoteEntryMeta};
pub use stats::{CacheStatistics, StatsRegistry, TierCounters, MEMORY_TIER, REMOTE_TIER, TIERED};
