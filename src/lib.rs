//! Stratum - Tiered Cache Coordination and Event Sourcing
//!
//! Two cooperating subsystems behind one error type:
//!
//! - a two-tier cache: a bounded in-process tier with pluggable eviction,
//!   tag invalidation and glob enumeration, in front of an optional remote
//!   key-value tier;
//! - an event store with per-stream optimistic concurrency and snapshots,
//!   plus a replay engine that re-dispatches stored events.
//!
//! # Architecture
//!
//! ```text
//!              ┌────────────────────────────────┐
//!              │           AppContext           │
//!              └──────┬──────────────┬──────────┘
//!                     │              │
//!          ┌──────────▼───┐   ┌──────▼───────┐   ┌───────────────┐
//!          │ TieredCache  │   │ ReplayEngine │──▶│EventDispatcher│
//!          └──┬────────┬──┘   └──────┬───────┘   └───────────────┘
//!             │        │             │
//!      ┌──────▼─┐  ┌───▼────┐  ┌─────▼──────┐
//!      │ Memory │  │ Remote │  │ EventStore │
//!      └────────┘  └───┬────┘  └─────┬──────┘
//!                      │             │
//!               RemoteBackend    Connection
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Memory tier, remote adapter and tiered coordinator
//! - [`events`] - Event store, dispatch port and replay engine
//! - [`config`] - YAML configuration
//! - [`context`] - Component assembly
//! - [`error`] - Error types

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod events;

// Re-export commonly used types
pub use cache::{CacheConfig, CacheOptions, CacheProvider, EvictionStrategy, MemoryCache, TieredCache};
pub use config::AppConfig;
pub use context::AppContext;
pub use error::{Error, Result};
pub use events::{EventStore, EventStoreOptions, NewEvent, ReplayEngine, ReplayOptions, StoredEvent};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
