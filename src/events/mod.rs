//! Event Sourcing
//!
//! Append-only per-stream event log ([`EventStore`]) with optimistic
//! concurrency and snapshots, and a [`ReplayEngine`] that re-dispatches
//! stored events.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐      ┌──────────────────┐
//! │   ReplayEngine   │─────▶│ EventDispatcher  │
//! └────────┬─────────┘      └──────────────────┘
//!          │ count / page / checkpoint
//! ┌────────▼─────────┐
//! │    EventStore    │  per-stream mutex, snapshots
//! └────────┬─────────┘
//!          │ Connection / Transaction
//! ┌────────▼─────────┐
//! │  SQLite (sqlx)   │
//! └──────────────────┘
//! ```

pub mod connection;
pub mod dispatch;
pub mod model;
pub mod replay;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use connection::{Connection, QueryResult, Row, SqlValue, Transaction};
pub use dispatch::{DispatchContext, EventDispatcher, InMemoryDispatcher, LoggingDispatcher};
pub use model::{
    EventCursor, EventFilter, EventStoreOptions, EventStream, NewEvent, ReplayCheckpoint, Snapshot,
    StoredEvent, StreamState,
};
pub use replay::{
    ReplayEngine, ReplayError, ReplayOptions, ReplayProgress, ReplayResult, ReplayState,
    ReplayValidation,
};
pub use schema::TableNames;
pub use sqlite::SqliteConnection;
pub use store::{EventStore, MergeSnapshotBuilder, SnapshotBuilder, DEFAULT_BACKWARDS_LIMIT};
