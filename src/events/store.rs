//! Event Store
//!
//! Append-only, per-stream versioned event log persisted through a
//! [`Connection`].
//!
//! # Design
//!
//! - Appends run inside one transaction: version check, event inserts, the
//!   stream version bump and (at exact multiples of the snapshot frequency)
//!   the snapshot all commit or roll back together.
//! - Appends to the same stream are serialized by a per-stream async mutex;
//!   the conditional `UPDATE ... WHERE version = ?` backs it up when several
//!   store instances share one database.
//! - Reads take no stream lock and only observe committed rows.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, SubsecRound, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::connection::{Connection, Executor, SqlValue, Transaction};
use super::model::{
    stream_type_of, EventCursor, EventFilter, EventStoreOptions, EventStream, NewEvent,
    ReplayCheckpoint, Snapshot, StoredEvent, StreamState,
};
use super::schema::{format_timestamp, TableNames};
use crate::error::{Error, Result};

/// Default page size of [`EventStore::read_stream_backwards`]
pub const DEFAULT_BACKWARDS_LIMIT: usize = 100;

const EVENT_COLUMNS: &str =
    "id, stream_id, version, name, data, metadata, correlation_id, causation_id, stored_at";

// =============================================================================
// Snapshot Builder
// =============================================================================

/// Folds events into aggregate state for snapshots
pub trait SnapshotBuilder: Send + Sync {
    /// Build state from the previous snapshot (if any) and the events after it
    fn build(&self, previous: Option<&Snapshot>, events: &[StoredEvent]) -> Result<Value>;
}

/// Shallow merge of object payloads on top of the previous snapshot.
/// Non-object payloads are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct MergeSnapshotBuilder;

impl SnapshotBuilder for MergeSnapshotBuilder {
    fn build(&self, previous: Option<&Snapshot>, events: &[StoredEvent]) -> Result<Value> {
        let mut state = match previous.map(|s| &s.data) {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        for event in events {
            if let Value::Object(fields) = &event.data {
                for (key, value) in fields {
                    state.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(Value::Object(state))
    }
}

// =============================================================================
// Event Store
// =============================================================================

/// Event store over a relational connection
pub struct EventStore {
    connection: Arc<dyn Connection>,
    options: EventStoreOptions,
    tables: TableNames,
    stream_locks: DashMap<String, Arc<Mutex<()>>>,
    snapshot_builder: Arc<dyn SnapshotBuilder>,
}

impl EventStore {
    /// Open the store, creating its tables when missing
    pub async fn open(connection: Arc<dyn Connection>, options: EventStoreOptions) -> Result<Self> {
        let tables = TableNames::new(&options.table_prefix)?;
        tables.migrate(connection.as_ref()).await?;

        info!(
            prefix = %options.table_prefix,
            snapshot_frequency = options.snapshot_frequency,
            "Event store ready"
        );

        Ok(Self {
            connection,
            options,
            tables,
            stream_locks: DashMap::new(),
            snapshot_builder: Arc::new(MergeSnapshotBuilder),
        })
    }

    /// Replace the snapshot builder
    pub fn with_snapshot_builder(mut self, builder: Arc<dyn SnapshotBuilder>) -> Self {
        self.snapshot_builder = builder;
        self
    }

    pub fn options(&self) -> &EventStoreOptions {
        &self.options
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    fn reader(&self) -> Executor<'_> {
        Executor::Connection(self.connection.as_ref())
    }

    fn stream_lock(&self, stream_id: &str) -> Arc<Mutex<()>> {
        self.stream_locks.entry(stream_id.to_string()).or_default().clone()
    }

    fn release_stream_lock(&self, stream_id: &str) {
        self.stream_locks
            .remove_if(stream_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    // =========================================================================
    // Append
    // =========================================================================

    /// Append events, optionally checking the current stream version first.
    ///
    /// Returns the stored events with their assigned versions. An empty batch
    /// still performs the version check but writes nothing.
    #[instrument(skip_all, fields(stream_id = %stream_id, count = events.len(), expected_version = ?expected_version))]
    pub async fn append_to_stream(
        &self,
        stream_id: &str,
        events: Vec<NewEvent>,
        expected_version: Option<u64>,
    ) -> Result<Vec<StoredEvent>> {
        if stream_id.is_empty() {
            return Err(Error::Validation("stream id must not be empty".into()));
        }

        let lock = self.stream_lock(stream_id);
        let result = {
            let _guard = lock.lock().await;
            self.append_locked(stream_id, events, expected_version).await
        };
        drop(lock);
        self.release_stream_lock(stream_id);

        if let Ok(stored) = &result {
            if let Some(last) = stored.last() {
                debug!(stream_id = %stream_id, version = last.version, "Appended events");
            }
        }
        result
    }

    async fn append_locked(
        &self,
        stream_id: &str,
        events: Vec<NewEvent>,
        expected_version: Option<u64>,
    ) -> Result<Vec<StoredEvent>> {
        let mut tx = self.connection.begin().await?;
        let outcome = self.append_in(&mut *tx, stream_id, events, expected_version).await;
        match outcome {
            Ok(stored) => tx.commit().await.map(|_| stored),
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(stream_id = %stream_id, error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn append_in(
        &self,
        tx: &mut dyn Transaction,
        stream_id: &str,
        events: Vec<NewEvent>,
        expected_version: Option<u64>,
    ) -> Result<Vec<StoredEvent>> {
        let mut db = Executor::Transaction(tx);

        let stream = self.fetch_stream(&mut db, stream_id).await?;
        if stream.as_ref().is_some_and(EventStream::is_deleted) {
            return Err(Error::StreamDeleted(stream_id.to_string()));
        }

        let current = stream.as_ref().map_or(0, |s| s.version);
        if let Some(expected) = expected_version {
            if expected != current {
                return Err(Error::ConcurrencyConflict {
                    stream_id: stream_id.to_string(),
                    expected,
                    actual: current,
                });
            }
        }
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let stored_at = Utc::now().trunc_subsecs(6);
        let stamp = format_timestamp(stored_at);
        if stream.is_none() {
            self.create_stream(&mut db, stream_id, &stamp).await?;
        }

        let insert = format!(
            "INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.tables.events, EVENT_COLUMNS
        );
        let mut stored = Vec::with_capacity(events.len());
        for (offset, event) in events.into_iter().enumerate() {
            let record = StoredEvent {
                id: Uuid::new_v4().to_string(),
                stream_id: stream_id.to_string(),
                version: current + offset as u64 + 1,
                name: event.name,
                data: event.data,
                metadata: event.metadata,
                correlation_id: event.correlation_id,
                causation_id: event.causation_id,
                stored_at,
            };
            db.execute(
                &insert,
                &[
                    SqlValue::from(&record.id),
                    SqlValue::from(stream_id),
                    SqlValue::from(record.version),
                    SqlValue::from(&record.name),
                    SqlValue::from(serde_json::to_string(&record.data)?),
                    SqlValue::from(serde_json::to_string(&record.metadata)?),
                    SqlValue::from(record.correlation_id.clone()),
                    SqlValue::from(record.causation_id.clone()),
                    SqlValue::from(stamp.as_str()),
                ],
            )
            .await?;
            stored.push(record);
        }

        let new_version = current + stored.len() as u64;
        let updated = db
            .execute(
                &format!(
                    "UPDATE {} SET version = ?, updated_at = ? WHERE stream_id = ? AND version = ?",
                    self.tables.streams
                ),
                &[new_version.into(), stamp.as_str().into(), stream_id.into(), current.into()],
            )
            .await?;
        if updated.rows_affected != 1 {
            let actual = self
                .fetch_stream(&mut db, stream_id)
                .await?
                .map_or(0, |s| s.version);
            return Err(Error::ConcurrencyConflict {
                stream_id: stream_id.to_string(),
                expected: current,
                actual,
            });
        }

        let frequency = self.options.snapshot_frequency;
        if frequency > 0 && new_version % frequency == 0 {
            self.write_snapshot(&mut db, stream_id, new_version, &stamp).await?;
        }

        Ok(stored)
    }

    async fn create_stream(&self, db: &mut Executor<'_>, stream_id: &str, stamp: &str) -> Result<()> {
        let existing = self.count(db, &self.tables.streams, "deleted_at IS NULL").await?;
        if existing >= self.options.max_streams {
            warn!(
                streams = existing,
                max_streams = self.options.max_streams,
                "Stream count exceeds advisory limit"
            );
        }

        db.execute(
            &format!(
                "INSERT INTO {} (stream_id, stream_type, version, created_at, updated_at) \
                 VALUES (?, ?, 0, ?, ?)",
                self.tables.streams
            ),
            &[
                stream_id.into(),
                stream_type_of(stream_id).into(),
                stamp.into(),
                stamp.into(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn write_snapshot(
        &self,
        db: &mut Executor<'_>,
        stream_id: &str,
        version: u64,
        stamp: &str,
    ) -> Result<()> {
        let previous = self.fetch_snapshot(db, stream_id).await?;
        let since = previous.as_ref().map_or(0, |s| s.version);
        let events = self
            .select_events(
                db,
                "WHERE stream_id = ? AND version > ? AND version <= ? ORDER BY version",
                &[stream_id.into(), since.into(), version.into()],
            )
            .await?;

        let data = self.snapshot_builder.build(previous.as_ref(), &events)?;
        db.execute(
            &format!(
                "INSERT INTO {} (stream_id, version, data, created_at) VALUES (?, ?, ?, ?)",
                self.tables.snapshots
            ),
            &[
                stream_id.into(),
                version.into(),
                serde_json::to_string(&data)?.into(),
                stamp.into(),
            ],
        )
        .await?;

        info!(stream_id = %stream_id, version, "Created snapshot");
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Events with `from_version <= version <= to_version`, ascending
    pub async fn read_stream(
        &self,
        stream_id: &str,
        from_version: u64,
        to_version: Option<u64>,
    ) -> Result<Vec<StoredEvent>> {
        let mut db = self.reader();
        match to_version {
            Some(to) => {
                self.select_events(
                    &mut db,
                    "WHERE stream_id = ? AND version >= ? AND version <= ? ORDER BY version ASC",
                    &[stream_id.into(), from_version.into(), to.into()],
                )
                .await
            }
            None => {
                self.select_events(
                    &mut db,
                    "WHERE stream_id = ? AND version >= ? ORDER BY version ASC",
                    &[stream_id.into(), from_version.into()],
                )
                .await
            }
        }
    }

    /// Up to `limit` events at or below `from_version` (latest when `None`), descending
    pub async fn read_stream_backwards(
        &self,
        stream_id: &str,
        from_version: Option<u64>,
        limit: usize,
    ) -> Result<Vec<StoredEvent>> {
        let mut db = self.reader();
        let limit = SqlValue::from(limit as u64);
        match from_version {
            Some(from) => {
                self.select_events(
                    &mut db,
                    "WHERE stream_id = ? AND version <= ? ORDER BY version DESC LIMIT ?",
                    &[stream_id.into(), from.into(), limit],
                )
                .await
            }
            None => {
                self.select_events(
                    &mut db,
                    "WHERE stream_id = ? ORDER BY version DESC LIMIT ?",
                    &[stream_id.into(), limit],
                )
                .await
            }
        }
    }

    /// Current version; 0 for unknown streams
    pub async fn get_stream_version(&self, stream_id: &str) -> Result<u64> {
        let stream = self.fetch_stream(&mut self.reader(), stream_id).await?;
        Ok(stream.map_or(0, |s| s.version))
    }

    pub async fn get_stream(&self, stream_id: &str) -> Result<Option<EventStream>> {
        self.fetch_stream(&mut self.reader(), stream_id).await
    }

    /// Number of streams that are not soft-deleted
    pub async fn stream_count(&self) -> Result<u64> {
        self.count(&mut self.reader(), &self.tables.streams, "deleted_at IS NULL")
            .await
    }

    /// Latest snapshot
    pub async fn get_snapshot(&self, stream_id: &str) -> Result<Option<Snapshot>> {
        self.fetch_snapshot(&mut self.reader(), stream_id).await
    }

    /// Latest snapshot plus every event recorded after it. The version is
    /// the stream header's, which outlives archived events and snapshots.
    pub async fn load_stream_state(&self, stream_id: &str) -> Result<StreamState> {
        let lock = self.stream_lock(stream_id);
        let state = {
            let _guard = lock.lock().await;
            self.read_stream_state(stream_id).await
        };
        drop(lock);
        self.release_stream_lock(stream_id);
        state
    }

    async fn read_stream_state(&self, stream_id: &str) -> Result<StreamState> {
        let mut db = self.reader();
        let version = self
            .fetch_stream(&mut db, stream_id)
            .await?
            .map_or(0, |s| s.version);
        let snapshot = self.fetch_snapshot(&mut db, stream_id).await?;
        let from = snapshot.as_ref().map_or(0, |s| s.version + 1);
        let events = self.read_stream(stream_id, from, Some(version)).await?;

        Ok(StreamState {
            snapshot,
            events,
            version,
        })
    }

    /// Check that retained versions are contiguous and end at the stream
    /// version. Archival may remove a prefix, so the first retained version
    /// need not be 1.
    pub async fn verify_stream(&self, stream_id: &str) -> Result<u64> {
        let mut db = self.reader();
        let Some(stream) = self.fetch_stream(&mut db, stream_id).await? else {
            return Ok(0);
        };

        let rows = db
            .fetch_all(
                &format!(
                    "SELECT version FROM {} WHERE stream_id = ? ORDER BY version",
                    self.tables.events
                ),
                &[stream_id.into()],
            )
            .await?;
        let versions = rows
            .iter()
            .map(|row| row.get_u64("version"))
            .collect::<Result<Vec<_>>>()?;

        for pair in versions.windows(2) {
            if pair[1] != pair[0] + 1 {
                return Err(Error::Corruption(format!(
                    "stream {} has a gap between versions {} and {}",
                    stream_id, pair[0], pair[1]
                )));
            }
        }

        let last = versions.last().copied().unwrap_or(0);
        if !versions.is_empty() && last != stream.version {
            return Err(Error::Corruption(format!(
                "stream {} records version {} but its last event is {}",
                stream_id, stream.version, last
            )));
        }
        Ok(stream.version)
    }

    /// Events sharing a correlation id, ordered by stream then version
    pub async fn find_events_by_correlation_id(&self, correlation_id: &str) -> Result<Vec<StoredEvent>> {
        self.select_events(
            &mut self.reader(),
            "WHERE correlation_id = ? ORDER BY stream_id, version",
            &[correlation_id.into()],
        )
        .await
    }

    /// Events of one type within an optional storage-time window, in storage order
    pub async fn find_events_by_type(
        &self,
        name: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<StoredEvent>> {
        let filter = EventFilter {
            from_date: from,
            to_date: to,
            event_types: vec![name.to_string()],
            ..Default::default()
        };
        let (clause, params) = filter_clause(&filter, None);
        self.select_events(
            &mut self.reader(),
            &format!("{} ORDER BY stored_at, stream_id, version", clause),
            &params,
        )
        .await
    }

    // =========================================================================
    // Deletion and maintenance
    // =========================================================================

    /// Soft delete tombstones the stream; hard delete removes its events,
    /// snapshots and header. Returns false when there was nothing to delete.
    pub async fn delete_stream(&self, stream_id: &str, soft: bool) -> Result<bool> {
        let lock = self.stream_lock(stream_id);
        let result = {
            let _guard = lock.lock().await;
            if soft {
                self.soft_delete(stream_id).await
            } else {
                self.hard_delete(stream_id).await
            }
        };
        drop(lock);
        self.release_stream_lock(stream_id);

        if matches!(result, Ok(true)) {
            info!(stream_id = %stream_id, soft, "Deleted stream");
        }
        result
    }

    async fn soft_delete(&self, stream_id: &str) -> Result<bool> {
        let stamp = format_timestamp(Utc::now());
        let done = self
            .connection
            .execute(
                &format!(
                    "UPDATE {} SET deleted_at = ?, updated_at = ? WHERE stream_id = ? AND deleted_at IS NULL",
                    self.tables.streams
                ),
                &[stamp.as_str().into(), stamp.as_str().into(), stream_id.into()],
            )
            .await?;
        Ok(done.rows_affected > 0)
    }

    async fn hard_delete(&self, stream_id: &str) -> Result<bool> {
        let statements = [
            format!("DELETE FROM {} WHERE stream_id = ?", self.tables.events),
            format!("DELETE FROM {} WHERE stream_id = ?", self.tables.snapshots),
            format!("DELETE FROM {} WHERE stream_id = ?", self.tables.streams),
        ];
        let params = [SqlValue::from(stream_id)];

        let mut tx = self.connection.begin().await?;
        let mut removed = 0;
        for sql in &statements {
            let outcome = tx.execute(sql, &params).await;
            match outcome {
                Ok(done) => removed += done.rows_affected,
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!(stream_id = %stream_id, error = %rollback, "Rollback failed");
                    }
                    return Err(e);
                }
            }
        }
        tx.commit().await?;
        Ok(removed > 0)
    }

    /// Delete events stored before `older_than`, snapshots created before it,
    /// and streams tombstoned before it together with everything they own.
    /// Returns the number of events removed.
    #[instrument(skip(self))]
    pub async fn archive_events(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let cutoff = format_timestamp(older_than);
        let t = &self.tables;
        let tombstoned = format!(
            "SELECT stream_id FROM {} WHERE deleted_at IS NOT NULL AND deleted_at < ?",
            t.streams
        );
        let statements = [
            format!(
                "DELETE FROM {} WHERE stored_at < ? OR stream_id IN ({})",
                t.events, tombstoned
            ),
            format!(
                "DELETE FROM {} WHERE created_at < ? OR stream_id IN ({})",
                t.snapshots, tombstoned
            ),
            format!(
                "DELETE FROM {} WHERE deleted_at IS NOT NULL AND deleted_at < ?",
                t.streams
            ),
        ];
        let cutoff_param = SqlValue::from(cutoff.as_str());
        let twice = [cutoff_param.clone(), cutoff_param.clone()];
        let once = [cutoff_param];
        let params: [&[SqlValue]; 3] = [&twice, &twice, &once];

        let mut tx = self.connection.begin().await?;
        let mut counts = [0u64; 3];
        for ((count, sql), params) in counts.iter_mut().zip(&statements).zip(params) {
            let outcome = tx.execute(sql, params).await;
            match outcome {
                Ok(done) => *count = done.rows_affected,
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!(error = %rollback, "Rollback failed");
                    }
                    return Err(e);
                }
            }
        }
        tx.commit().await?;

        info!(
            events = counts[0],
            snapshots = counts[1],
            streams = counts[2],
            cutoff = %cutoff,
            "Archived old events"
        );
        Ok(counts[0])
    }

    /// Archive everything older than the retention window
    /// (`retention_days` from the options when `None`)
    pub async fn cleanup(&self, retention_days: Option<u32>) -> Result<u64> {
        let days = retention_days.unwrap_or(self.options.retention_days);
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(days));
        self.archive_events(cutoff).await
    }

    // =========================================================================
    // Replay support
    // =========================================================================

    /// Number of events matching a filter
    pub async fn count_events(&self, filter: &EventFilter) -> Result<u64> {
        let (clause, params) = filter_clause(filter, None);
        let row = self
            .reader()
            .fetch_optional(
                &format!("SELECT COUNT(*) AS n FROM {} {}", self.tables.events, clause),
                &params,
            )
            .await?;
        match row {
            Some(row) => row.get_u64("n"),
            None => Ok(0),
        }
    }

    /// One page of matching events in storage order, strictly after `after`
    pub async fn load_events(
        &self,
        filter: &EventFilter,
        after: Option<&EventCursor>,
        limit: usize,
    ) -> Result<Vec<StoredEvent>> {
        let (clause, mut params) = filter_clause(filter, after);
        params.push(SqlValue::from(limit as u64));
        self.select_events(
            &mut self.reader(),
            &format!("{} ORDER BY stored_at, stream_id, version LIMIT ?", clause),
            &params,
        )
        .await
    }

    /// Persist one batch checkpoint in its own transaction
    pub async fn record_replay_checkpoint(&self, checkpoint: &ReplayCheckpoint) -> Result<()> {
        let sql = format!(
            "INSERT OR REPLACE INTO {} (replay_id, batch, last_event_id, processed, failed, recorded_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
            self.tables.checkpoints
        );
        let params = [
            SqlValue::from(&checkpoint.replay_id),
            SqlValue::from(checkpoint.batch),
            SqlValue::from(checkpoint.last_event_id.clone()),
            SqlValue::from(checkpoint.processed),
            SqlValue::from(checkpoint.failed),
            SqlValue::from(format_timestamp(checkpoint.recorded_at)),
        ];

        let mut tx = self.connection.begin().await?;
        let outcome = tx.execute(&sql, &params).await;
        if let Err(e) = outcome {
            if let Err(rollback) = tx.rollback().await {
                warn!(replay_id = %checkpoint.replay_id, error = %rollback, "Rollback failed");
            }
            return Err(e);
        }
        tx.commit().await
    }

    /// Checkpoints of one replay, by batch
    pub async fn replay_checkpoints(&self, replay_id: &str) -> Result<Vec<ReplayCheckpoint>> {
        let rows = self
            .reader()
            .fetch_all(
                &format!(
                    "SELECT replay_id, batch, last_event_id, processed, failed, recorded_at \
                     FROM {} WHERE replay_id = ? ORDER BY batch",
                    self.tables.checkpoints
                ),
                &[replay_id.into()],
            )
            .await?;
        rows.iter().map(ReplayCheckpoint::from_row).collect()
    }

    // =========================================================================
    // Row helpers
    // =========================================================================

    async fn fetch_stream(&self, db: &mut Executor<'_>, stream_id: &str) -> Result<Option<EventStream>> {
        let row = db
            .fetch_optional(
                &format!(
                    "SELECT stream_id, stream_type, version, created_at, updated_at, deleted_at \
                     FROM {} WHERE stream_id = ?",
                    self.tables.streams
                ),
                &[stream_id.into()],
            )
            .await?;
        row.as_ref().map(EventStream::from_row).transpose()
    }

    async fn fetch_snapshot(&self, db: &mut Executor<'_>, stream_id: &str) -> Result<Option<Snapshot>> {
        let row = db
            .fetch_optional(
                &format!(
                    "SELECT stream_id, version, data, created_at FROM {} \
                     WHERE stream_id = ? ORDER BY version DESC LIMIT 1",
                    self.tables.snapshots
                ),
                &[stream_id.into()],
            )
            .await?;
        row.as_ref().map(Snapshot::from_row).transpose()
    }

    async fn select_events(
        &self,
        db: &mut Executor<'_>,
        clause: &str,
        params: &[SqlValue],
    ) -> Result<Vec<StoredEvent>> {
        let sql = format!("SELECT {} FROM {} {}", EVENT_COLUMNS, self.tables.events, clause);
        db.fetch_all(&sql, params)
            .await?
            .iter()
            .map(StoredEvent::from_row)
            .collect()
    }

    async fn count(&self, db: &mut Executor<'_>, table: &str, condition: &str) -> Result<u64> {
        let row = db
            .fetch_optional(
                &format!("SELECT COUNT(*) AS n FROM {} WHERE {}", table, condition),
                &[],
            )
            .await?;
        match row {
            Some(row) => row.get_u64("n"),
            None => Ok(0),
        }
    }
}

/// `WHERE` clause for a filter and optional keyset cursor
fn filter_clause(filter: &EventFilter, after: Option<&EventCursor>) -> (String, Vec<SqlValue>) {
    let mut conditions = Vec::new();
    let mut params = Vec::new();

    if let Some(from) = filter.from_version {
        conditions.push("version >= ?".to_string());
        params.push(SqlValue::from(from));
    }
    if let Some(to) = filter.to_version {
        conditions.push("version <= ?".to_string());
        params.push(SqlValue::from(to));
    }
    if let Some(from) = filter.from_date {
        conditions.push("stored_at >= ?".to_string());
        params.push(SqlValue::from(format_timestamp(from)));
    }
    if let Some(to) = filter.to_date {
        conditions.push("stored_at <= ?".to_string());
        params.push(SqlValue::from(format_timestamp(to)));
    }
    if !filter.event_types.is_empty() {
        conditions.push(format!("name IN ({})", placeholders(filter.event_types.len())));
        params.extend(filter.event_types.iter().map(SqlValue::from));
    }
    if !filter.stream_ids.is_empty() {
        conditions.push(format!("stream_id IN ({})", placeholders(filter.stream_ids.len())));
        params.extend(filter.stream_ids.iter().map(SqlValue::from));
    }
    if let Some(cursor) = after {
        let stamp = format_timestamp(cursor.stored_at);
        conditions.push(
            "(stored_at > ? OR (stored_at = ? AND (stream_id > ? OR (stream_id = ? AND version > ?))))"
                .to_string(),
        );
        params.extend([
            SqlValue::from(stamp.as_str()),
            SqlValue::from(stamp.as_str()),
            SqlValue::from(&cursor.stream_id),
            SqlValue::from(&cursor.stream_id),
            SqlValue::from(cursor.version),
        ]);
    }

    if conditions.is_empty() {
        (String::new(), params)
    } else {
        (format!("WHERE {}", conditions.join(" AND ")), params)
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
