//! Error types for Stratum

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache tiers, the event store and the replay engine
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    // =========================================================================
    // Validation Errors
    // =========================================================================
    /// Malformed glob pattern
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Invalid argument or option
    #[error("Validation error: {0}")]
    Validation(String),

    /// Payload exceeds the configured limit
    #[error("Payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    // =========================================================================
    // Event Store Errors
    // =========================================================================
    /// Expected stream version did not match the stored version
    #[error("Concurrency conflict on stream {stream_id}: expected version {expected}, actual {actual}")]
    ConcurrencyConflict {
        stream_id: String,
        expected: u64,
        actual: u64,
    },

    /// Append attempted on a tombstoned stream
    #[error("Stream has been deleted: {0}")]
    StreamDeleted(String),

    /// Stored data violates a structural invariant
    #[error("Event store corruption: {0}")]
    Corruption(String),

    /// Relational backend failure
    #[error("Database error: {0}")]
    Database(String),

    // =========================================================================
    // Cache Backend Errors
    // =========================================================================
    /// Backend not connected or not reachable
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Backend failed to become ready during start-up
    #[error("Backend {backend} not ready after {timeout_ms}ms")]
    InitializationTimeout { backend: String, timeout_ms: u64 },

    /// Remote backend command failed
    #[error("Remote cache error: {0}")]
    Remote(String),

    /// A fan-out operation succeeded on some tiers only
    #[error("Partial failure after {completed} completed: {source}")]
    PartialFailure {
        completed: u64,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // Replay Errors
    // =========================================================================
    /// Another replay is already running
    #[error("A replay is already in progress")]
    ReplayInProgress,

    /// Dispatch sink rejected an event
    #[error("Dispatch failed for event {event_name}: {reason}")]
    Dispatch { event_name: String, reason: String },

    // =========================================================================
    // Encoding Errors
    // =========================================================================
    /// JSON serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    // =========================================================================
    // General Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for optimistic-concurrency failures that a caller may retry
    /// after re-reading the stream version.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Error::ConcurrencyConflict { .. })
    }

    /// True when the failure came from an unreachable backend.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Error::BackendUnavailable(_) | Error::InitializationTimeout { .. }
        )
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Database(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(feature = "redis-backend")]
impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
            Error::BackendUnavailable(err.to_string())
        } else {
            Error::Remote(err.to_string())
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
