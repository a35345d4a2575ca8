//! Event Store Schema
//!
//! Table names are derived from a configurable prefix so several stores can
//! share one database. The prefix is interpolated into SQL, so it is
//! restricted to ASCII alphanumerics and underscores.

use chrono::{DateTime, SecondsFormat, Utc};

use super::connection::Connection;
use crate::error::{Error, Result};

/// Physical table names for one store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub streams: String,
    pub events: String,
    pub snapshots: String,
    pub checkpoints: String,
}

impl TableNames {
    pub fn new(prefix: &str) -> Result<Self> {
        validate_prefix(prefix)?;
        Ok(Self {
            streams: format!("{}Streams", prefix),
            events: format!("{}Events", prefix),
            snapshots: format!("{}Snapshots", prefix),
            checkpoints: format!("{}ReplayCheckpoints", prefix),
        })
    }

    /// DDL statements, idempotent
    pub fn ddl(&self) -> Vec<String> {
        let TableNames {
            streams,
            events,
            snapshots,
            checkpoints,
        } = self;

        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {streams} (
                    stream_id TEXT PRIMARY KEY,
                    stream_type TEXT NOT NULL,
                    version INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    deleted_at TEXT
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {events} (
                    id TEXT PRIMARY KEY,
                    stream_id TEXT NOT NULL,
                    version INTEGER NOT NULL,
                    name TEXT NOT NULL,
                    data TEXT NOT NULL,
                    metadata TEXT NOT NULL,
                    correlation_id TEXT,
                    causation_id TEXT,
                    stored_at TEXT NOT NULL,
                    UNIQUE (stream_id, version)
                )"
            ),
            format!("CREATE INDEX IF NOT EXISTS idx_{events}_correlation ON {events} (correlation_id)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{events}_name ON {events} (name, stored_at)"),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{events}_stored ON {events} (stored_at, stream_id, version)"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {snapshots} (
                    stream_id TEXT NOT NULL,
                    version INTEGER NOT NULL,
                    data TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (stream_id, version)
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {checkpoints} (
                    replay_id TEXT NOT NULL,
                    batch INTEGER NOT NULL,
                    last_event_id TEXT,
                    processed INTEGER NOT NULL,
                    failed INTEGER NOT NULL,
                    recorded_at TEXT NOT NULL,
                    PRIMARY KEY (replay_id, batch)
                )"
            ),
        ]
    }

    /// Create every table and index
    pub async fn migrate(&self, connection: &dyn Connection) -> Result<()> {
        for statement in self.ddl() {
            connection.execute(&statement, &[]).await?;
        }
        Ok(())
    }
}

fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(Error::Config("table prefix must not be empty".into()));
    }
    if let Some(c) = prefix.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(Error::Config(format!(
            "table prefix '{}' contains invalid character '{}'",
            prefix, c
        )));
    }
    Ok(())
}

/// Fixed-width RFC 3339 text, so lexical order equals time order
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| Error::Corruption(format!("invalid timestamp '{}': {}", text, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::sqlite::SqliteConnection;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    #[test]
    fn test_table_names() {
        let names = TableNames::new("EventStore").unwrap();
        assert_eq!(names.streams, "EventStoreStreams");
        assert_eq!(names.events, "EventStoreEvents");
        assert_eq!(names.snapshots, "EventStoreSnapshots");
        assert_eq!(names.checkpoints, "EventStoreReplayCheckpoints");
    }

    #[test]
    fn test_invalid_prefix() {
        assert_matches!(TableNames::new(""), Err(Error::Config(_)));
        assert_matches!(TableNames::new("x; DROP TABLE y"), Err(Error::Config(_)));
        assert!(TableNames::new("tenant_01").is_ok());
    }

    #[test]
    fn test_timestamp_ordering() {
        let early = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let late = early + chrono::Duration::microseconds(1);
        let (a, b) = (format_timestamp(early), format_timestamp(late));
        assert!(a < b);
        assert_eq!(a, "2024-01-02T03:04:05.000000Z");
        assert_eq!(parse_timestamp(&b).unwrap(), late);
        assert_matches!(parse_timestamp("yesterday"), Err(Error::Corruption(_)));
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let conn = SqliteConnection::in_memory().await.unwrap();
        let names = TableNames::new("Test").unwrap();
        names.migrate(&conn).await.unwrap();
        names.migrate(&conn).await.unwrap();

        let tables = conn
            .execute(
                "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                &[],
            )
            .await
            .unwrap();
        let names: Vec<_> = tables.rows.iter().map(|r| r.get_str("name").unwrap().to_string()).collect();
        assert_eq!(
            names,
            vec!["TestEvents", "TestReplayCheckpoints", "TestSnapshots", "TestStreams"]
        );
    }
}
