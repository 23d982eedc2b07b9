use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use crate::ingestion::collector::PublishReport;
use crate::ingestion::topic_bus::{BusMessage, MessageId, TopicBus};
use crate::models::RawEvent;

/// Publishes collected events onto a topic, attaching the attributes a
/// downstream subscriber filters on: source, event id, symbols and, when
/// present, tenant id.
pub struct EventPublisher {
    bus: Arc<dyn TopicBus>,
    topic: String,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn TopicBus>, topic_prefix: &str) -> Self {
        Self {
            bus,
            topic: format!("{topic_prefix}-raw-events"),
        }
    }

    pub async fn publish_batch(&self, events: Vec<RawEvent>) -> PublishReport {
        let total = events.len();
        let mut report = PublishReport::all_ok(total);

        for event in events {
            match self.encode(&event) {
                Ok(message) => match self.bus.publish(&self.topic, message).await {
                    Ok(_message_id) => {}
                    Err(detail) => {
                        warn!(event_id = %event.event_id, error = %detail, "broker rejected publish");
                        report.record_failure(detail);
                    }
                },
                Err(detail) => {
                    warn!(event_id = %event.event_id, error = %detail, "failed to encode event for publish");
                    report.record_failure(detail);
                }
            }
        }

        report
    }

    /// Publishes a single event, returning the broker-assigned message id.
    /// Used by streaming collectors, which hand events to the publisher one
    /// frame at a time rather than as a batch.
    pub async fn publish_one(&self, event: RawEvent) -> Result<MessageId, String> {
        let message = self.encode(&event)?;
        self.bus.publish(&self.topic, message).await
    }

    fn encode(&self, event: &RawEvent) -> Result<BusMessage, String> {
        let data = serde_json::to_vec(event).map_err(|e| e.to_string())?;

        let mut attributes = BTreeMap::new();
        attributes.insert("source".to_string(), event.source.as_str().to_string());
        attributes.insert("event_id".to_string(), event.event_id.to_string());
        if !event.symbols.is_empty() {
            attributes.insert("symbols".to_string(), event.symbols.join(","));
        }
        if let Some(tenant_id) = &event.tenant_id {
            attributes.insert("tenant_id".to_string(), tenant_id.clone());
        }

        Ok(BusMessage { data, attributes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::topic_bus::{InMemoryTopicBus, Subscriber};
    use crate::models::DataSource;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    struct CapturingSubscriber {
        captured: Mutex<Vec<BusMessage>>,
    }

    #[async_trait]
    impl Subscriber for CapturingSubscriber {
        async fn on_message(&self, _topic: &str, message: BusMessage) {
            self.captured.lock().await.push(message);
        }
    }

    #[tokio::test]
    async fn publish_batch_attaches_attributes() {
        let bus: Arc<dyn TopicBus> = Arc::new(InMemoryTopicBus::new());
        let sub = Arc::new(CapturingSubscriber {
            captured: Mutex::new(Vec::new()),
        });
        bus.subscribe("sentilyze-raw-events", sub.clone()).await;

        let publisher = EventPublisher::new(bus, "sentilyze");
        let mut event = RawEvent::new(DataSource::Exchange, "BTCUSDT", "BTC up 3%");
        event.symbols = vec!["BTC".to_string()];
        event.tenant_id = Some("tenant-a".to_string());

        let report = publisher.publish_batch(vec![event]).await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 0);

        let captured = sub.captured.lock().await;
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].attributes.get("source").unwrap(), "exchange");
        assert_eq!(captured[0].attributes.get("symbols").unwrap(), "BTC");
        assert_eq!(captured[0].attributes.get("tenant_id").unwrap(), "tenant-a");
    }

    #[tokio::test]
    async fn publish_batch_omits_tenant_id_attribute_when_absent() {
        let bus: Arc<dyn TopicBus> = Arc::new(InMemoryTopicBus::new());
        let sub = Arc::new(CapturingSubscriber {
            captured: Mutex::new(Vec::new()),
        });
        bus.subscribe("sentilyze-raw-events", sub.clone()).await;

        let publisher = EventPublisher::new(bus, "sentilyze");
        let event = RawEvent::new(DataSource::Rss, "guid-1", "headline");

        publisher.publish_batch(vec![event]).await;

        let captured = sub.captured.lock().await;
        assert!(!captured[0].attributes.contains_key("tenant_id"));
    }
}
