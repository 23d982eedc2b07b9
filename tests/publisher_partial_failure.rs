use std::sync::Arc;

use async_trait::async_trait;
use sentinel_ingest::ingestion::publisher::EventPublisher;
use sentinel_ingest::ingestion::topic_bus::{BusMessage, InMemoryTopicBus, Subscriber, TopicBus};
use sentinel_ingest::models::{DataSource, MetadataValue, RawEvent};
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

/// A NaN metadata value is not representable in JSON, so `serde_json`
/// rejects it at encode time — this is a real publish failure, not a
/// simulated one, and exercises the same path a malformed upstream payload
/// would.
#[tokio::test]
async fn one_unencodable_event_in_a_batch_is_reported_without_blocking_the_rest() {
    let bus: Arc<dyn TopicBus> = Arc::new(InMemoryTopicBus::new());
    let subscriber = Arc::new(CapturingSubscriber {
        captured: Mutex::new(Vec::new()),
    });
    bus.subscribe("sentinel-raw-events", subscriber.clone()).await;

    let publisher = EventPublisher::new(bus, "sentinel");

    let good_one = RawEvent::new(DataSource::Exchange, "BTCUSDT", "BTC up 2%");

    let mut broken = RawEvent::new(DataSource::Exchange, "ETHUSDT", "ETH moved");
    broken
        .metadata
        .insert("last_price".to_string(), MetadataValue::Real(f64::NAN));

    let good_two = RawEvent::new(DataSource::Exchange, "SOLUSDT", "SOL moved");

    let report = publisher
        .publish_batch(vec![good_one, broken, good_two])
        .await;

    assert_eq!(report.total, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.first_errors.len(), 1);

    let captured = subscriber.captured.lock().await;
    assert_eq!(captured.len(), 2);
}
