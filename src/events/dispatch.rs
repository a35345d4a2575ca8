//! Event Dispatch Port
//!
//! The replay engine re-emits stored events through an [`EventDispatcher`].
//! Production wiring supplies the live dispatch subsystem; this module
//! carries a tracing sink and an in-memory recorder.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Correlation data passed with each dispatch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchContext {
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub metadata: Map<String, Value>,
}

/// Live dispatch sink
#[async_trait]
pub trait EventDispatcher: Send + Sync {
    /// Emit an event; returns the id the sink assigned
    async fn dispatch(&self, name: &str, payload: Value, context: DispatchContext) -> Result<String>;
}

/// Logs every dispatch and accepts it
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDispatcher;

#[async_trait]
impl EventDispatcher for LoggingDispatcher {
    async fn dispatch(&self, name: &str, _payload: Value, context: DispatchContext) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        info!(
            event = %name,
            dispatch_id = %id,
            correlation_id = context.correlation_id.as_deref().unwrap_or("-"),
            "Dispatched event"
        );
        Ok(id)
    }
}

/// One recorded dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedEvent {
    pub name: String,
    pub payload: Value,
    pub context: DispatchContext,
}

/// Records dispatches in memory; selected event names can be made to fail
#[derive(Debug, Default)]
pub struct InMemoryDispatcher {
    dispatched: Mutex<Vec<DispatchedEvent>>,
    failing: Mutex<HashSet<String>>,
}

impl InMemoryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every dispatch of `name`
    pub fn failing_on(self, name: impl Into<String>) -> Self {
        self.failing.lock().insert(name.into());
        self
    }

    pub fn dispatched(&self) -> Vec<DispatchedEvent> {
        self.dispatched.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.dispatched.lock().len()
    }
}

#[async_trait]
impl EventDispatcher for InMemoryDispatcher {
    async fn dispatch(&self, name: &str, payload: Value, context: DispatchContext) -> Result<String> {
        if self.failing.lock().contains(name) {
            return Err(Error::Dispatch {
                event_name: name.to_string(),
                reason: "rejected by sink".to_string(),
            });
        }
        self.dispatched.lock().push(DispatchedEvent {
            name: name.to_string(),
            payload,
            context,
        });
        Ok(Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[tokio::test]
    async fn test_in_memory_dispatcher_records() {
        let sink = InMemoryDispatcher::new().failing_on("Broken");

        let id = sink
            .dispatch("Ok", json!({"n": 1}), DispatchContext::default())
            .await
            .unwrap();
        assert!(!id.is_empty());
        assert_matches!(
            sink.dispatch("Broken", json!(null), DispatchContext::default()).await,
            Err(Error::Dispatch { .. })
        );

        let recorded = sink.dispatched();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].payload, json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_logging_dispatcher_accepts() {
        let id = LoggingDispatcher
            .dispatch("Any", json!({}), DispatchContext::default())
            .await
            .unwrap();
        assert_eq!(id.len(), 36);
    }
}
