//! Event Replay Engine
//!
//! Re-dispatches stored events to a live [`EventDispatcher`].
//!
//! # Design
//!
//! ```text
//! Idle ──replay_events──▶ Running ──▶ Completed | Failed | Cancelled ──▶ Idle
//! ```
//!
//! - One replay per engine at a time; a second call fails immediately with
//!   [`Error::ReplayInProgress`].
//! - Matching events are counted, then paged in storage order with a keyset
//!   cursor. Events stored after the replay started are not picked up.
//! - Dispatch happens outside any transaction. After each batch a checkpoint
//!   row is written in its own transaction.
//! - Cancellation is cooperative and observed between batches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::dispatch::{DispatchContext, EventDispatcher};
use super::model::{EventCursor, EventFilter, ReplayCheckpoint, StoredEvent};
use super::store::EventStore;
use crate::error::{Error, Result};

/// Replays above this many events draw a warning from validation
pub const LARGE_REPLAY_EVENTS: u64 = 10_000;

// =============================================================================
// Options and results
// =============================================================================

/// Replay selection and execution options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayOptions {
    pub from_version: Option<u64>,
    pub to_version: Option<u64>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    /// Event names to include (all when empty)
    pub event_types: Vec<String>,
    /// Streams to include (all when empty)
    pub stream_ids: Vec<String>,
    pub batch_size: usize,
    pub parallel: bool,
    /// Concurrent dispatches per chunk in parallel mode
    pub max_parallel: usize,
    /// Record dispatch failures and keep going instead of aborting
    pub continue_on_error: bool,
    /// Run the pipeline without dispatching or writing checkpoints
    pub dry_run: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            from_version: None,
            to_version: None,
            from_date: None,
            to_date: None,
            event_types: Vec::new(),
            stream_ids: Vec::new(),
            batch_size: 1000,
            parallel: false,
            max_parallel: 5,
            continue_on_error: true,
            dry_run: false,
        }
    }
}

impl ReplayOptions {
    pub fn for_streams<I, S>(mut self, stream_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stream_ids = stream_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn for_types<I, S>(mut self, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = event_types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Dispatch up to `max_parallel` events at once
    pub fn in_parallel(mut self, max_parallel: usize) -> Self {
        self.parallel = true;
        self.max_parallel = max_parallel;
        self
    }

    pub fn stop_on_error(mut self) -> Self {
        self.continue_on_error = false;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Event selection these options describe
    pub fn filter(&self) -> EventFilter {
        EventFilter {
            from_version: self.from_version,
            to_version: self.to_version,
            from_date: self.from_date,
            to_date: self.to_date,
            event_types: self.event_types.clone(),
            stream_ids: self.stream_ids.clone(),
        }
    }

    /// Problems that make the options unusable
    pub fn check(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.batch_size == 0 {
            errors.push("batch_size must be greater than zero".to_string());
        }
        if self.parallel && self.max_parallel == 0 {
            errors.push("max_parallel must be greater than zero in parallel mode".to_string());
        }
        if let (Some(from), Some(to)) = (self.from_version, self.to_version) {
            if from > to {
                errors.push(format!("from_version {} is after to_version {}", from, to));
            }
        }
        if let (Some(from), Some(to)) = (self.from_date, self.to_date) {
            if from > to {
                errors.push(format!("from_date {} is after to_date {}", from, to));
            }
        }
        errors
    }
}

/// Replay lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayState {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for ReplayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReplayState::Idle => "idle",
            ReplayState::Running => "running",
            ReplayState::Completed => "completed",
            ReplayState::Failed => "failed",
            ReplayState::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// One failed dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayError {
    pub event_id: String,
    pub stream_id: String,
    pub version: u64,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Counters for one replay
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayProgress {
    pub total_events: u64,
    pub processed_events: u64,
    pub successful_events: u64,
    pub failed_events: u64,
    pub skipped_events: u64,
    pub current_batch: u64,
    pub total_batches: u64,
    pub errors: Vec<ReplayError>,
}

impl ReplayProgress {
    /// Fraction of matching events handled, in `[0, 1]`
    pub fn completion(&self) -> f64 {
        if self.total_events == 0 {
            1.0
        } else {
            (self.processed_events + self.skipped_events) as f64 / self.total_events as f64
        }
    }
}

/// Outcome of [`ReplayEngine::replay_events`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayResult {
    pub replay_id: String,
    pub state: ReplayState,
    pub dry_run: bool,
    pub progress: ReplayProgress,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Abort or cancellation reason
    pub error: Option<String>,
}

/// Outcome of [`ReplayEngine::validate_replay`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub matching_events: u64,
}

// =============================================================================
// Replay Engine
// =============================================================================

/// Batched re-dispatch of stored events
pub struct ReplayEngine {
    store: Arc<EventStore>,
    dispatcher: Arc<dyn EventDispatcher>,
    running: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    state: RwLock<ReplayState>,
    progress: RwLock<Option<ReplayProgress>>,
}

/// Returns the engine to `Idle` however the replay ends
struct RunGuard<'a> {
    engine: &'a ReplayEngine,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.engine.cancel.lock() = None;
        *self.engine.state.write() = ReplayState::Idle;
        self.engine.running.store(false, Ordering::Release);
    }
}

/// How a batch ended
enum BatchOutcome {
    Completed,
    Aborted(String),
}

impl ReplayEngine {
    pub fn new(store: Arc<EventStore>, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            running: AtomicBool::new(false),
            cancel: Mutex::new(None),
            state: RwLock::new(ReplayState::Idle),
            progress: RwLock::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ReplayState {
        *self.state.read()
    }

    /// Progress of the running replay, or of the last one
    pub fn current_progress(&self) -> Option<ReplayProgress> {
        self.progress.read().clone()
    }

    /// Ask the running replay to stop at the next batch boundary
    pub fn cancel_replay(&self) -> bool {
        match self.cancel.lock().as_ref() {
            Some(token) => {
                token.cancel();
                info!("Replay cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Replay every event matching `options`
    #[instrument(skip_all, fields(dry_run = options.dry_run, parallel = options.parallel))]
    pub async fn replay_events(&self, options: ReplayOptions) -> Result<ReplayResult> {
        let problems = options.check();
        if !problems.is_empty() {
            return Err(Error::Validation(problems.join("; ")));
        }

        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::ReplayInProgress);
        }
        let _guard = RunGuard { engine: self };

        let token = CancellationToken::new();
        *self.cancel.lock() = Some(token.clone());
        *self.state.write() = ReplayState::Running;

        let replay_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut progress = ReplayProgress::default();
        self.publish(&progress);

        info!(replay_id = %replay_id, "Starting replay");

        let outcome = self
            .run(&replay_id, &options, started_at, &token, &mut progress)
            .await;
        let (state, reason) = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                *self.state.write() = ReplayState::Failed;
                self.publish(&progress);
                error!(replay_id = %replay_id, error = %e, "Replay failed");
                return Err(e);
            }
        };
        *self.state.write() = state;

        let result = ReplayResult {
            replay_id,
            state,
            dry_run: options.dry_run,
            progress,
            started_at,
            finished_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
            error: reason,
        };

        info!(
            replay_id = %result.replay_id,
            state = %result.state,
            processed = result.progress.processed_events,
            failed = result.progress.failed_events,
            skipped = result.progress.skipped_events,
            duration_ms = result.duration_ms,
            "Replay finished"
        );
        Ok(result)
    }

    async fn run(
        &self,
        replay_id: &str,
        options: &ReplayOptions,
        started_at: DateTime<Utc>,
        token: &CancellationToken,
        progress: &mut ReplayProgress,
    ) -> Result<(ReplayState, Option<String>)> {
        let mut filter = options.filter();
        filter.to_date = Some(filter.to_date.map_or(started_at, |to| to.min(started_at)));

        progress.total_events = self.store.count_events(&filter).await?;
        progress.total_batches = progress.total_events.div_ceil(options.batch_size as u64);
        self.publish(progress);
        debug!(
            total_events = progress.total_events,
            total_batches = progress.total_batches,
            "Counted replay events"
        );

        let mut cursor: Option<EventCursor> = None;
        loop {
            if token.is_cancelled() {
                warn!(replay_id = %replay_id, batch = progress.current_batch, "Replay cancelled");
                return Ok((ReplayState::Cancelled, Some("replay cancelled".to_string())));
            }

            let batch = self
                .store
                .load_events(&filter, cursor.as_ref(), options.batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }
            progress.current_batch += 1;
            cursor = batch.last().map(StoredEvent::cursor);

            let outcome = if options.dry_run {
                progress.processed_events += batch.len() as u64;
                progress.successful_events += batch.len() as u64;
                BatchOutcome::Completed
            } else {
                self.dispatch_batch(replay_id, &batch, options, progress).await
            };

            if let BatchOutcome::Aborted(reason) = outcome {
                self.publish(progress);
                return Ok((ReplayState::Failed, Some(reason)));
            }

            if !options.dry_run {
                self.store
                    .record_replay_checkpoint(&ReplayCheckpoint {
                        replay_id: replay_id.to_string(),
                        batch: progress.current_batch,
                        last_event_id: batch.last().map(|e| e.id.clone()),
                        processed: progress.processed_events,
                        failed: progress.failed_events,
                        recorded_at: Utc::now(),
                    })
                    .await?;
            }
            self.publish(progress);

            if batch.len() < options.batch_size {
                break;
            }
        }

        Ok((ReplayState::Completed, None))
    }

    async fn dispatch_batch(
        &self,
        replay_id: &str,
        batch: &[StoredEvent],
        options: &ReplayOptions,
        progress: &mut ReplayProgress,
    ) -> BatchOutcome {
        let chunk_size = if options.parallel { options.max_parallel } else { 1 };
        let mut handled = 0;

        for chunk in batch.chunks(chunk_size) {
            let results = join_all(chunk.iter().map(|event| self.dispatch_one(replay_id, event))).await;
            handled += chunk.len();

            let mut first_failure = None;
            for (event, result) in chunk.iter().zip(results) {
                progress.processed_events += 1;
                match result {
                    Ok(_) => progress.successful_events += 1,
                    Err(e) => {
                        progress.failed_events += 1;
                        warn!(
                            event_id = %event.id,
                            stream_id = %event.stream_id,
                            version = event.version,
                            error = %e,
                            "Replay dispatch failed"
                        );
                        let message = e.to_string();
                        first_failure.get_or_insert_with(|| message.clone());
                        progress.errors.push(ReplayError {
                            event_id: event.id.clone(),
                            stream_id: event.stream_id.clone(),
                            version: event.version,
                            error: message,
                            timestamp: Utc::now(),
                        });
                    }
                }
            }

            if let Some(reason) = first_failure {
                if !options.continue_on_error {
                    progress.skipped_events += (batch.len() - handled) as u64;
                    return BatchOutcome::Aborted(reason);
                }
            }
        }
        BatchOutcome::Completed
    }

    async fn dispatch_one(&self, replay_id: &str, event: &StoredEvent) -> Result<String> {
        let mut metadata = event.metadata.clone();
        metadata.insert("isReplay".into(), Value::Bool(true));
        metadata.insert("originalEventId".into(), Value::from(event.id.clone()));
        metadata.insert("originalVersion".into(), Value::from(event.version));
        metadata.insert("originalStreamId".into(), Value::from(event.stream_id.clone()));
        metadata.insert("replayId".into(), Value::from(replay_id));

        let context = DispatchContext {
            correlation_id: event.correlation_id.clone(),
            causation_id: event.causation_id.clone(),
            metadata,
        };
        self.dispatcher
            .dispatch(&event.name, event.data.clone(), context)
            .await
    }

    /// Check options and report what a replay would cover
    pub async fn validate_replay(&self, options: &ReplayOptions) -> Result<ReplayValidation> {
        let mut errors = options.check();
        if self.is_running() {
            errors.push("a replay is already in progress".to_string());
        }
        if !errors.is_empty() {
            return Ok(ReplayValidation {
                valid: false,
                errors,
                ..Default::default()
            });
        }

        let filter = options.filter();
        let matching = self.store.count_events(&filter).await?;
        let mut warnings = Vec::new();

        if filter.is_unbounded() {
            warnings.push("no filter given: every stored event will be replayed".to_string());
        }
        if matching == 0 {
            warnings.push("no events match the given filter".to_string());
        }
        if matching > LARGE_REPLAY_EVENTS {
            warnings.push(format!(
                "{} events match; consider narrowing the filter",
                matching
            ));
            if options.parallel {
                warnings.push(
                    "parallel dispatch of a large replay does not preserve order within a chunk"
                        .to_string(),
                );
            }
        }

        Ok(ReplayValidation {
            valid: true,
            errors,
            warnings,
            matching_events: matching,
        })
    }

    fn publish(&self, progress: &ReplayProgress) {
        *self.progress.write() = Some(progress.clone());
    }
}
