use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, broadcast};
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::errors::{CircuitBreakerOpen, CoreError};
use crate::ingestion::circuit_breaker::CircuitBreaker;
use crate::ingestion::collector::{EventCollector, StreamingCollector};
use crate::ingestion::publisher::EventPublisher;
use crate::ingestion::quota::QuotaCounter;
use crate::models::CircuitBreakerState;

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub collector: &'static str,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_events_collected: usize,
    pub consecutive_failures: u64,
    pub breaker: CircuitBreakerState,
}

struct RegisteredCollector {
    collector: Arc<dyn EventCollector>,
    breaker: Arc<CircuitBreaker>,
    poll_interval: Duration,
    status: Arc<RwLock<JobStatus>>,
}

struct RegisteredStream {
    collector: Arc<dyn StreamingCollector>,
}

/// Runs each registered collector on its own interval, concurrently with
/// every other collector, gating ticks on that collector's circuit breaker.
/// Streaming collectors run alongside on their own long-lived task, forwarding
/// everything they receive to the same publisher.
pub struct CollectionScheduler {
    collectors: Vec<RegisteredCollector>,
    streams: Vec<RegisteredStream>,
    publisher: Arc<EventPublisher>,
    quota: Arc<QuotaCounter>,
    shutdown_grace: Duration,
    shutdown_tx: broadcast::Sender<()>,
}

impl CollectionScheduler {
    pub fn new(
        publisher: Arc<EventPublisher>,
        quota: Arc<QuotaCounter>,
        shutdown_grace: Duration,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            collectors: Vec::new(),
            streams: Vec::new(),
            publisher,
            quota,
            shutdown_grace,
            shutdown_tx,
        }
    }

    /// Registers a long-lived streaming collector. Started alongside the
    /// polling collectors in `start`, independent of their tick intervals.
    pub fn register_stream(&mut self, collector: Arc<dyn StreamingCollector>) {
        self.streams.push(RegisteredStream { collector });
    }

    pub fn register(
        &mut self,
        collector: Arc<dyn EventCollector>,
        breaker_failure_threshold: usize,
        breaker_reset_timeout: Duration,
        poll_interval: Duration,
    ) {
        let name = collector.name();
        let breaker = Arc::new(CircuitBreaker::new(name, breaker_failure_threshold, breaker_reset_timeout));
        let status = Arc::new(RwLock::new(JobStatus {
            collector: name,
            last_tick_at: None,
            last_success_at: None,
            last_events_collected: 0,
            consecutive_failures: 0,
            breaker: CircuitBreakerState {
                failure_count: 0,
                last_failure_time: None,
                is_open: false,
                threshold: breaker_failure_threshold,
                reset_timeout_seconds: breaker_reset_timeout.as_secs(),
            },
        }));
        self.collectors.push(RegisteredCollector {
            collector,
            breaker,
            poll_interval,
            status,
        });
    }

    /// Spawns one tick loop per registered collector plus one task per
    /// registered stream, and returns immediately. Each loop runs until a
    /// shutdown signal is observed.
    pub fn start(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();
        for entry in &self.collectors {
            let collector = entry.collector.clone();
            let breaker = entry.breaker.clone();
            let status = entry.status.clone();
            let publisher = self.publisher.clone();
            let quota = self.quota.clone();
            let poll_interval = entry.poll_interval;
            let mut shutdown_rx = self.shutdown_tx.subscribe();

            let handle = tokio::spawn(async move {
                let mut ticker = interval(poll_interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let _ = run_one_tick(&collector, &breaker, &status, &publisher, &quota).await;
                        }
                        _ = shutdown_rx.recv() => {
                            info!(collector = collector.name(), "tick loop shutting down");
                            break;
                        }
                    }
                }
            });
            handles.push(handle);
        }

        for entry in &self.streams {
            let collector = entry.collector.clone();
            let publisher = self.publisher.clone();
            let mut shutdown_rx = self.shutdown_tx.subscribe();

            let handle = tokio::spawn(async move {
                let name = collector.name();
                let (tx, mut rx) = tokio::sync::mpsc::channel(256);

                let forward = tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        if let Err(err) = publisher.publish_one(event).await {
                            error!(collector = name, error = %err, "failed to publish streamed event");
                        }
                    }
                });

                tokio::select! {
                    result = collector.start_stream(tx) => {
                        if let Err(err) = result {
                            error!(collector = name, error = %err, "streaming collector exited with error");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!(collector = name, "stream loop shutting down");
                        let _ = collector.stop_stream().await;
                    }
                }
                forward.abort();
            });
            handles.push(handle);
        }

        handles
    }

    /// Broadcasts shutdown and waits up to the configured grace period for
    /// in-flight ticks to finish.
    pub async fn shutdown(&self, handles: Vec<tokio::task::JoinHandle<()>>) {
        let _ = self.shutdown_tx.send(());
        let grace = self.shutdown_grace;
        let wait_all = futures_util::future::join_all(handles);

        if tokio::time::timeout(grace, wait_all).await.is_err() {
            warn!(
                grace_seconds = grace.as_secs(),
                "scheduler shutdown grace period elapsed with tasks still running"
            );
        }
    }

    pub async fn status_snapshot(&self) -> BTreeMap<String, JobStatus> {
        let mut snapshot = BTreeMap::new();
        for entry in &self.collectors {
            let mut status = entry.status.read().await.clone();
            status.breaker = entry.breaker.snapshot().await;
            snapshot.insert(entry.collector.name().to_string(), status);
        }
        snapshot
    }

    /// Triggers a single out-of-band tick for a registered collector by
    /// name. Returns `None` if no collector with that name is registered;
    /// otherwise `Some(Ok(published_count))` on a normal tick or
    /// `Some(Err(_))` when the breaker is open or the collector itself
    /// failed — distinguishing those two from "collected zero events" is
    /// the point of returning a `Result` here instead of a bare count.
    pub async fn trigger(&self, collector_name: &str) -> Option<Result<usize, CoreError>> {
        for entry in &self.collectors {
            if entry.collector.name() == collector_name {
                return Some(
                    run_one_tick(&entry.collector, &entry.breaker, &entry.status, &self.publisher, &self.quota)
                        .await,
                );
            }
        }
        None
    }

    /// Triggers an out-of-band tick for every registered collector,
    /// concurrently, and reports each one's outcome by name.
    pub async fn trigger_all(&self) -> BTreeMap<String, Result<usize, CoreError>> {
        let ticks = self.collectors.iter().map(|entry| {
            run_one_tick(&entry.collector, &entry.breaker, &entry.status, &self.publisher, &self.quota)
        });
        let results = futures_util::future::join_all(ticks).await;

        self.collectors
            .iter()
            .map(|entry| entry.collector.name().to_string())
            .zip(results)
            .collect()
    }
}

async fn run_one_tick(
    collector: &Arc<dyn EventCollector>,
    breaker: &Arc<CircuitBreaker>,
    status: &Arc<RwLock<JobStatus>>,
    publisher: &Arc<EventPublisher>,
    quota: &Arc<QuotaCounter>,
) -> Result<usize, CoreError> {
    let name = collector.name();

    if !breaker.allow_tick().await {
        warn!(collector = name, "skipping tick, breaker open");
        return Err(CoreError::CircuitBreakerOpen(CircuitBreakerOpen {
            service: name.to_string(),
        }));
    }

    {
        let mut status = status.write().await;
        status.last_tick_at = Some(Utc::now());
    }

    quota.record_call(name);

    match collector.collect().await {
        Ok(events) => {
            breaker.on_success().await;
            let count = events.len();
            let report = publisher.publish_batch(events).await;
            if report.failed > 0 {
                warn!(collector = name, failed = report.failed, total = report.total, "partial publish failure");
            }
            let published = report.succeeded;

            let mut status = status.write().await;
            status.last_success_at = Some(Utc::now());
            status.last_events_collected = count;
            status.consecutive_failures = 0;
            Ok(published)
        }
        Err(err) => {
            breaker.on_failure().await;
            error!(collector = name, error = %err, "collection tick failed");

            let mut status = status.write().await;
            status.consecutive_failures += 1;
            Err(CoreError::ExternalService(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExternalServiceError;
    use crate::ingestion::topic_bus::InMemoryTopicBus;
    use crate::models::{DataSource, RawEvent};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyCollector {
        calls: AtomicUsize,
        fail_first_n: usize,
    }

    #[async_trait]
    impl EventCollector for FlakyCollector {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn collect(&self) -> Result<Vec<RawEvent>, ExternalServiceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                Err(ExternalServiceError {
                    service: "flaky".to_string(),
                    status_code: Some(500),
                    details: "boom".to_string(),
                })
            } else {
                Ok(vec![RawEvent::new(DataSource::Exchange, "id", "content")])
            }
        }
    }

    #[tokio::test]
    async fn scheduler_opens_breaker_after_repeated_failures() {
        let bus: Arc<dyn crate::ingestion::topic_bus::TopicBus> = Arc::new(InMemoryTopicBus::new());
        let publisher = Arc::new(EventPublisher::new(bus, "test"));
        let quota = Arc::new(QuotaCounter::new(1000));
        let mut scheduler = CollectionScheduler::new(publisher, quota, Duration::from_secs(1));

        let collector = Arc::new(FlakyCollector {
            calls: AtomicUsize::new(0),
            fail_first_n: 10,
        });
        scheduler.register(collector, 3, Duration::from_secs(300), Duration::from_millis(10));

        for _ in 0..5 {
            scheduler.trigger("flaky").await;
        }

        let snapshot = scheduler.status_snapshot().await;
        let status = snapshot.get("flaky").unwrap();
        assert!(status.breaker.is_open);
    }

    #[tokio::test]
    async fn trigger_runs_a_single_tick_and_updates_status() {
        let bus: Arc<dyn crate::ingestion::topic_bus::TopicBus> = Arc::new(InMemoryTopicBus::new());
        let publisher = Arc::new(EventPublisher::new(bus, "test"));
        let quota = Arc::new(QuotaCounter::new(1000));
        let mut scheduler = CollectionScheduler::new(publisher, quota, Duration::from_secs(1));

        let collector = Arc::new(FlakyCollector {
            calls: AtomicUsize::new(0),
            fail_first_n: 0,
        });
        scheduler.register(collector, 5, Duration::from_secs(300), Duration::from_millis(10));

        let collected = scheduler.trigger("flaky").await;
        assert!(matches!(collected, Some(Ok(1))));

        let snapshot = scheduler.status_snapshot().await;
        assert_eq!(snapshot.get("flaky").unwrap().last_events_collected, 1);
    }

    #[tokio::test]
    async fn trigger_of_unknown_collector_returns_none() {
        let bus: Arc<dyn crate::ingestion::topic_bus::TopicBus> = Arc::new(InMemoryTopicBus::new());
        let publisher = Arc::new(EventPublisher::new(bus, "test"));
        let quota = Arc::new(QuotaCounter::new(1000));
        let scheduler = CollectionScheduler::new(publisher, quota, Duration::from_secs(1));

        assert!(scheduler.trigger("does-not-exist").await.is_none());
    }

    #[tokio::test]
    async fn trigger_while_breaker_open_returns_typed_error() {
        let bus: Arc<dyn crate::ingestion::topic_bus::TopicBus> = Arc::new(InMemoryTopicBus::new());
        let publisher = Arc::new(EventPublisher::new(bus, "test"));
        let quota = Arc::new(QuotaCounter::new(1000));
        let mut scheduler = CollectionScheduler::new(publisher, quota, Duration::from_secs(1));

        let collector = Arc::new(FlakyCollector {
            calls: AtomicUsize::new(0),
            fail_first_n: 10,
        });
        scheduler.register(collector, 2, Duration::from_secs(300), Duration::from_millis(10));

        for _ in 0..2 {
            scheduler.trigger("flaky").await;
        }

        match scheduler.trigger("flaky").await {
            Some(Err(crate::errors::CoreError::CircuitBreakerOpen(err))) => {
                assert_eq!(err.service, "flaky");
            }
            other => panic!("expected a CircuitBreakerOpen error, got {other:?}"),
        }
    }
}
