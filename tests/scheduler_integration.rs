use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sentinel_ingest::errors::ExternalServiceError;
use sentinel_ingest::ingestion::collector::EventCollector;
use sentinel_ingest::ingestion::publisher::EventPublisher;
use sentinel_ingest::ingestion::quota::QuotaCounter;
use sentinel_ingest::ingestion::scheduler::CollectionScheduler;
use sentinel_ingest::ingestion::topic_bus::{BusMessage, InMemoryTopicBus, Subscriber, TopicBus};
use sentinel_ingest::models::{DataSource, RawEvent};
use tokio::sync::Mutex;

struct AlwaysFailingCollector;

#[async_trait]
impl EventCollector for AlwaysFailingCollector {
    fn name(&self) -> &'static str {
        "always-failing"
    }

    async fn collect(&self) -> Result<Vec<RawEvent>, ExternalServiceError> {
        Err(ExternalServiceError {
            service: "always-failing".to_string(),
            status_code: Some(503),
            details: "upstream unavailable".to_string(),
        })
    }
}

struct SucceedingCollector {
    calls: AtomicUsize,
}

#[async_trait]
impl EventCollector for SucceedingCollector {
    fn name(&self) -> &'static str {
        "succeeding"
    }

    async fn collect(&self) -> Result<Vec<RawEvent>, ExternalServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            RawEvent::new(DataSource::Rss, "guid-1", "headline one"),
            RawEvent::new(DataSource::Rss, "guid-2", "headline two"),
        ])
    }
}

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
async fn repeated_failures_open_the_breaker_end_to_end() {
    let bus: Arc<dyn TopicBus> = Arc::new(InMemoryTopicBus::new());
    let publisher = Arc::new(EventPublisher::new(bus, "sentinel"));
    let quota = Arc::new(QuotaCounter::new(1000));
    let mut scheduler = CollectionScheduler::new(publisher, quota, Duration::from_secs(1));

    scheduler.register(
        Arc::new(AlwaysFailingCollector),
        3,
        Duration::from_secs(300),
        Duration::from_millis(10),
    );

    for _ in 0..3 {
        scheduler.trigger("always-failing").await;
    }

    let snapshot = scheduler.status_snapshot().await;
    let status = snapshot.get("always-failing").unwrap();
    assert!(status.breaker.is_open);
    assert_eq!(status.breaker.failure_count, 3);

    // A fourth tick is skipped entirely because the breaker is open; the
    // quota counter still only reflects the three real attempts.
    match scheduler.trigger("always-failing").await {
        Some(Err(sentinel_ingest::errors::CoreError::CircuitBreakerOpen(err))) => {
            assert_eq!(err.service, "always-failing");
        }
        other => panic!("expected a CircuitBreakerOpen error, got {other:?}"),
    }
}

#[tokio::test]
async fn successful_ticks_publish_every_collected_event_onto_the_bus() {
    let bus: Arc<dyn TopicBus> = Arc::new(InMemoryTopicBus::new());
    let subscriber = Arc::new(CapturingSubscriber {
        captured: Mutex::new(Vec::new()),
    });
    bus.subscribe("sentinel-raw-events", subscriber.clone()).await;

    let publisher = Arc::new(EventPublisher::new(bus, "sentinel"));
    let quota = Arc::new(QuotaCounter::new(1000));
    let mut scheduler = CollectionScheduler::new(publisher, quota.clone(), Duration::from_secs(1));

    scheduler.register(
        Arc::new(SucceedingCollector {
            calls: AtomicUsize::new(0),
        }),
        5,
        Duration::from_secs(300),
        Duration::from_millis(10),
    );

    let collected = scheduler.trigger("succeeding").await;
    assert!(matches!(collected, Some(Ok(2))));

    let captured = subscriber.captured.lock().await;
    assert_eq!(captured.len(), 2);
    assert_eq!(quota.count_today("succeeding"), 1);

    let snapshot = scheduler.status_snapshot().await;
    let status = snapshot.get("succeeding").unwrap();
    assert!(!status.breaker.is_open);
    assert_eq!(status.last_events_collected, 2);
    assert_eq!(status.consecutive_failures, 0);
}
