//! Best-effort fan-out of engine events to subscribers
//!
//! Subscribers implement [`EventSink`] and receive every published event in
//! publish order. A failing sink is logged and skipped; it never blocks or
//! aborts delivery to the others.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, info, warn};
use reqwest::Client;

use crate::error::AlertError;
use crate::events::EngineEvent;

/// A destination for published engine events
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: &EngineEvent) -> Result<(), AlertError>;
    fn name(&self) -> &str;
}

/// Opaque handle identifying one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// Fan-out publisher over registered sinks
///
/// The sink table is locked for the duration of one publish, so publishes
/// are serialized and every subscriber observes events in publish order.
/// No ordering is promised between subscribers.
pub struct EventPublisher {
    sinks: Mutex<BTreeMap<u64, Box<dyn EventSink>>>,
    next_handle: AtomicU64,
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            sinks: Mutex::new(BTreeMap::new()),
            next_handle: AtomicU64::new(0),
        }
    }

    /// Register a sink and return its handle
    pub fn subscribe(&self, sink: Box<dyn EventSink>) -> SubscriptionHandle {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        debug!("Subscribing sink '{}' with handle {}", sink.name(), id);
        self.sinks.lock().unwrap().insert(id, sink);
        SubscriptionHandle(id)
    }

    /// Remove a subscription; returns false if the handle was not registered
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.sinks.lock().unwrap().remove(&handle.0).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sinks.lock().unwrap().len()
    }

    /// Deliver `event` to every sink, skipping and logging failures
    pub fn publish(&self, event: &EngineEvent) {
        let sinks = self.sinks.lock().unwrap();
        for (id, sink) in sinks.iter() {
            if let Err(e) = sink.deliver(event) {
                warn!(
                    "Subscriber {} ('{}') failed to receive event {}: {}",
                    id,
                    sink.name(),
                    event.id,
                    e
                );
            }
        }
    }
}

/// Sink that writes every event to the application log
pub struct LogSink;

impl EventSink for LogSink {
    fn deliver(&self, event: &EngineEvent) -> Result<(), AlertError> {
        info!(
            "Event {:?} for {}/{}: {}",
            event.kind, event.organization_id, event.framework, event.summary
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Sink that POSTs each event as JSON to a configured webhook URL
pub struct WebhookSink {
    client: Client,
    url: String,
    runtime: tokio::runtime::Runtime,
}

impl WebhookSink {
    pub fn new(url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .no_proxy()
            .build()
            .expect("Failed to create HTTP client");

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("Failed to create webhook runtime");

        Self {
            client,
            url,
            runtime,
        }
    }
}

impl EventSink for WebhookSink {
    fn deliver(&self, event: &EngineEvent) -> Result<(), AlertError> {
        let response = self
            .runtime
            .block_on(async { self.client.post(&self.url).json(event).send().await })?;

        if !response.status().is_success() {
            return Err(AlertError::DeliveryFailed(format!(
                "webhook returned {}",
                response.status()
            )));
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EngineEventKind;
    use std::sync::Arc;

    /// Records every delivered summary for order assertions
    struct RecordingSink {
        delivered: Arc<Mutex<Vec<String>>>,
    }

    impl EventSink for RecordingSink {
        fn deliver(&self, event: &EngineEvent) -> Result<(), AlertError> {
            self.delivered.lock().unwrap().push(event.summary.clone());
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    struct FailingSink;

    impl EventSink for FailingSink {
        fn deliver(&self, _event: &EngineEvent) -> Result<(), AlertError> {
            Err(AlertError::DeliveryFailed("always fails".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn create_test_event(summary: &str) -> EngineEvent {
        EngineEvent::new(EngineEventKind::ValidationCompleted, "acme", "NCA", summary)
    }

    #[test]
    fn test_delivery_preserves_publish_order() {
        let publisher = EventPublisher::new();
        let delivered = Arc::new(Mutex::new(Vec::new()));
        publisher.subscribe(Box::new(RecordingSink {
            delivered: Arc::clone(&delivered),
        }));

        for i in 0..5 {
            publisher.publish(&create_test_event(&format!("event {i}")));
        }

        let seen = delivered.lock().unwrap();
        let expected: Vec<String> = (0..5).map(|i| format!("event {i}")).collect();
        assert_eq!(*seen, expected);
    }

    #[test]
    fn test_failing_subscriber_does_not_block_others() {
        let publisher = EventPublisher::new();
        publisher.subscribe(Box::new(FailingSink));
        let delivered = Arc::new(Mutex::new(Vec::new()));
        publisher.subscribe(Box::new(RecordingSink {
            delivered: Arc::clone(&delivered),
        }));

        publisher.publish(&create_test_event("survives"));

        assert_eq!(delivered.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let publisher = EventPublisher::new();
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let handle = publisher.subscribe(Box::new(RecordingSink {
            delivered: Arc::clone(&delivered),
        }));

        publisher.publish(&create_test_event("before"));
        assert!(publisher.unsubscribe(handle));
        publisher.publish(&create_test_event("after"));

        assert_eq!(*delivered.lock().unwrap(), vec!["before".to_string()]);
        assert!(!publisher.unsubscribe(handle));
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[test]
    fn test_publish_with_no_subscribers_is_a_noop() {
        let publisher = EventPublisher::new();
        publisher.publish(&create_test_event("nobody listening"));
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[test]
    fn test_mock_sink_receives_exactly_one_delivery() {
        let mut mock = MockEventSink::new();
        mock.expect_deliver().times(1).returning(|_| Ok(()));
        mock.expect_name().return_const("mock".to_string());

        let publisher = EventPublisher::new();
        publisher.subscribe(Box::new(mock));
        publisher.publish(&create_test_event("delivered once"));
    }
}
