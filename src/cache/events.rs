//! Cache Event Notifications
//!
//! Tiers publish [`CacheEvent`]s on a `tokio::sync::broadcast` channel.
//! Delivery is at-most-once and ordered per sender. A receiver that falls
//! behind loses the oldest events and sees `RecvError::Lagged`. Publishing
//! with no subscribers is a no-op.

use tokio::sync::broadcast;

use super::policy::EvictionStrategy;

/// Default channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Notification emitted by a cache tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// An entry was removed to make room for a new key
    Evicted {
        key: String,
        strategy: EvictionStrategy,
    },
    /// An expired entry was removed
    Expired { key: String },
    /// A tag was invalidated
    TagInvalidated { tag: String, count: u64 },
    /// A tier was cleared
    Cleared { tier: String, count: u64 },
    /// The remote backend became ready
    Connected { backend: String, attempts: u32 },
    /// A remote connection attempt failed and will be retried
    ConnectionRetry {
        backend: String,
        attempt: u32,
        error: String,
    },
}

impl CacheEvent {
    /// Event type name (for logging)
    pub fn event_type(&self) -> &'static str {
        match self {
            CacheEvent::Evicted { .. } => "Evicted",
            CacheEvent::Expired { .. } => "Expired",
            CacheEvent::TagInvalidated { .. } => "TagInvalidated",
            CacheEvent::Cleared { .. } => "Cleared",
            CacheEvent::Connected { .. } => "Connected",
            CacheEvent::ConnectionRetry { .. } => "ConnectionRetry",
        }
    }
}

/// Sending half shared by a tier
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    sender: broadcast::Sender<CacheEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn emit(&self, event: CacheEvent) {
        tracing::trace!(event_type = event.event_type(), "Cache event");
        // No receivers is not an error
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    #[tokio::test]
    async fn test_emit_without_subscribers() {
        let bus = EventBus::default();
        bus.emit(CacheEvent::Expired { key: "k".into() });
    }

    #[tokio::test]
    async fn test_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(CacheEvent::Expired { key: "a".into() });
        bus.emit(CacheEvent::TagInvalidated {
            tag: "t".into(),
            count: 2,
        });

        assert_eq!(rx.recv().await.unwrap(), CacheEvent::Expired { key: "a".into() });
        assert_eq!(rx.recv().await.unwrap().event_type(), "TagInvalidated");
    }

    #[tokio::test]
    async fn test_lagging_receiver_loses_oldest() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..4 {
            bus.emit(CacheEvent::Expired {
                key: format!("k{}", i),
            });
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(2))));
        assert_eq!(rx.recv().await.unwrap(), CacheEvent::Expired { key: "k2".into() });
    }
}
