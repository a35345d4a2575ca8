//! Event Store Model
//!
//! Streams, stored events, snapshots and the query shapes the replay engine
//! pages through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::connection::Row;
use super::schema::parse_timestamp;
use crate::error::{Error, Result};

/// Event to append; the store assigns id, version and storage time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub name: String,
    pub data: Value,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub causation_id: Option<String>,
}

impl NewEvent {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
            metadata: Map::new(),
            correlation_id: None,
            causation_id: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_causation_id(mut self, id: impl Into<String>) -> Self {
        self.causation_id = Some(id.into());
        self
    }
}

/// Persisted event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: String,
    pub stream_id: String,
    /// 1-based, contiguous within the stream
    pub version: u64,
    pub name: String,
    pub data: Value,
    pub metadata: Map<String, Value>,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub stored_at: DateTime<Utc>,
}

impl StoredEvent {
    pub(crate) fn from_row(row: &Row) -> Result<Self> {
        let id = row.get_str("id")?.to_string();
        let data = parse_json(row.get_str("data")?, &id, "data")?;
        let metadata = match parse_json(row.get_str("metadata")?, &id, "metadata")? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(Error::Corruption(format!(
                    "event {} metadata is not an object: {}",
                    id, other
                )))
            }
        };

        Ok(Self {
            stream_id: row.get_str("stream_id")?.to_string(),
            version: row.get_u64("version")?,
            name: row.get_str("name")?.to_string(),
            data,
            metadata,
            correlation_id: row.get_opt_str("correlation_id")?.map(str::to_string),
            causation_id: row.get_opt_str("causation_id")?.map(str::to_string),
            stored_at: parse_timestamp(row.get_str("stored_at")?)?,
            id,
        })
    }

    /// Position of this event in storage order
    pub fn cursor(&self) -> EventCursor {
        EventCursor {
            stored_at: self.stored_at,
            stream_id: self.stream_id.clone(),
            version: self.version,
        }
    }
}

fn parse_json(text: &str, event_id: &str, column: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|e| {
        Error::Corruption(format!("event {} has unparseable {}: {}", event_id, column, e))
    })
}

/// Stream header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStream {
    pub stream_id: String,
    pub stream_type: String,
    /// Version of the last appended event; 0 when empty
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl EventStream {
    pub(crate) fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            stream_id: row.get_str("stream_id")?.to_string(),
            stream_type: row.get_str("stream_type")?.to_string(),
            version: row.get_u64("version")?,
            created_at: parse_timestamp(row.get_str("created_at")?)?,
            updated_at: parse_timestamp(row.get_str("updated_at")?)?,
            deleted_at: row.get_opt_str("deleted_at")?.map(parse_timestamp).transpose()?,
        })
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Stream type: the id up to the first `-` or `:`
pub fn stream_type_of(stream_id: &str) -> &str {
    stream_id
        .split(['-', ':'])
        .next()
        .filter(|prefix| !prefix.is_empty())
        .unwrap_or(stream_id)
}

/// Aggregate state captured at a stream version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub stream_id: String,
    pub version: u64,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub(crate) fn from_row(row: &Row) -> Result<Self> {
        let stream_id = row.get_str("stream_id")?.to_string();
        let data = serde_json::from_str(row.get_str("data")?).map_err(|e| {
            Error::Corruption(format!("snapshot of {} is unparseable: {}", stream_id, e))
        })?;
        Ok(Self {
            version: row.get_u64("version")?,
            data,
            created_at: parse_timestamp(row.get_str("created_at")?)?,
            stream_id,
        })
    }
}

/// Latest snapshot plus the events recorded after it
#[derive(Debug, Clone, PartialEq)]
pub struct StreamState {
    pub snapshot: Option<Snapshot>,
    pub events: Vec<StoredEvent>,
    pub version: u64,
}

/// Event store tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventStoreOptions {
    pub table_prefix: String,
    /// Snapshot when a stream reaches a multiple of this (0 disables)
    pub snapshot_frequency: u64,
    /// Advisory; exceeding it only logs a warning
    pub max_streams: u64,
    /// Used by `cleanup` when no explicit retention is given
    pub retention_days: u32,
}

impl Default for EventStoreOptions {
    fn default() -> Self {
        Self {
            table_prefix: "EventStore".to_string(),
            snapshot_frequency: 100,
            max_streams: 10_000,
            retention_days: 30,
        }
    }
}

/// Cross-stream event selection used by replay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub from_version: Option<u64>,
    pub to_version: Option<u64>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub event_types: Vec<String>,
    pub stream_ids: Vec<String>,
}

impl EventFilter {
    /// True when no criterion narrows the selection
    pub fn is_unbounded(&self) -> bool {
        self.from_version.is_none()
            && self.to_version.is_none()
            && self.from_date.is_none()
            && self.to_date.is_none()
            && self.event_types.is_empty()
            && self.stream_ids.is_empty()
    }
}

/// Keyset pagination position: `(stored_at, stream_id, version)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCursor {
    pub stored_at: DateTime<Utc>,
    pub stream_id: String,
    pub version: u64,
}

/// Bookkeeping row written after each replayed batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayCheckpoint {
    pub replay_id: String,
    pub batch: u64,
    pub last_event_id: Option<String>,
    pub processed: u64,
    pub failed: u64,
    pub recorded_at: DateTime<Utc>,
}

impl ReplayCheckpoint {
    pub(crate) fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            replay_id: row.get_str("replay_id")?.to_string(),
            batch: row.get_u64("batch")?,
            last_event_id: row.get_opt_str("last_event_id")?.map(str::to_string),
            processed: row.get_u64("processed")?,
            failed: row.get_u64("failed")?,
            recorded_at: parse_timestamp(row.get_str("recorded_at")?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::connection::SqlValue;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn event_row(data: &str, metadata: &str) -> Row {
        Row::new(vec![
            ("id".into(), SqlValue::Text("e-1".into())),
            ("stream_id".into(), SqlValue::Text("order-1".into())),
            ("version".into(), SqlValue::Integer(4)),
            ("name".into(), SqlValue::Text("OrderPlaced".into())),
            ("data".into(), SqlValue::Text(data.into())),
            ("metadata".into(), SqlValue::Text(metadata.into())),
            ("correlation_id".into(), SqlValue::Text("c-1".into())),
            ("causation_id".into(), SqlValue::Null),
            ("stored_at".into(), SqlValue::Text("2024-05-01T10:00:00.000000Z".into())),
        ])
    }

    #[test]
    fn test_stored_event_from_row() {
        let event = StoredEvent::from_row(&event_row(r#"{"total":12}"#, r#"{"user":"u1"}"#)).unwrap();
        assert_eq!(event.version, 4);
        assert_eq!(event.data, json!({"total": 12}));
        assert_eq!(event.metadata.get("user"), Some(&json!("u1")));
        assert_eq!(event.correlation_id.as_deref(), Some("c-1"));
        assert_eq!(event.causation_id, None);
        assert_eq!(event.cursor().version, 4);
    }

    #[test]
    fn test_unparseable_payload_is_corruption() {
        assert_matches!(StoredEvent::from_row(&event_row("{oops", "{}")), Err(Error::Corruption(_)));
        assert_matches!(StoredEvent::from_row(&event_row("{}", "[1]")), Err(Error::Corruption(_)));
    }

    #[test]
    fn test_stream_type_of() {
        assert_eq!(stream_type_of("order-42"), "order");
        assert_eq!(stream_type_of("user:7:profile"), "user");
        assert_eq!(stream_type_of("ledger"), "ledger");
        assert_eq!(stream_type_of("-odd"), "-odd");
    }

    #[test]
    fn test_new_event_builders() {
        let event = NewEvent::new("Shipped", json!({"carrier": "ups"}))
            .with_metadata("source", json!("api"))
            .with_correlation_id("c-9")
            .with_causation_id("e-3");
        assert_eq!(event.correlation_id.as_deref(), Some("c-9"));
        assert_eq!(event.causation_id.as_deref(), Some("e-3"));
        assert_eq!(event.metadata.len(), 1);
    }

    #[test]
    fn test_options_defaults_from_yaml() {
        let options: EventStoreOptions = serde_yaml::from_str("snapshot_frequency: 10").unwrap();
        assert_eq!(options.snapshot_frequency, 10);
        assert_eq!(options.table_prefix, "EventStore");
        assert_eq!(options.max_streams, 10_000);
        assert_eq!(options.retention_days, 30);
    }

    #[test]
    fn test_filter_is_unbounded() {
        assert!(EventFilter::default().is_unbounded());
        let filter = EventFilter {
            event_types: vec!["OrderPlaced".into()],
            ..Default::default()
        };
        assert!(!filter.is_unbounded());
    }
}
