use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::ingestion::topic_bus::{BusMessage, TopicBus};
use crate::models::{AnomalyDetection, MarketContextEvent, ProcessedSentiment};
use crate::observability::metrics::Metrics;
use crate::processor::aggregator::SentimentAggregator;
use crate::processor::operators::{anomaly, correlation, regime};
use crate::processor::warehouse::WarehouseSink;

/// A decoded push message queued for background processing. The handler
/// itself only decodes and enqueues; publish + warehouse insert happen off
/// the request path.
struct WorkItem {
    context: MarketContextEvent,
}

/// Shared state for the market-context push consumer and analysis endpoints.
pub struct AppState {
    pub work_tx: mpsc::Sender<WorkItem>,
    pub aggregator: Arc<SentimentAggregator>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Builds the shared state and spawns the background worker that drains
    /// the work queue, publishing to `market-context` and inserting into the
    /// warehouse concurrently per item.
    pub fn new(
        bus: Arc<dyn TopicBus>,
        market_context_topic: String,
        warehouse: Arc<dyn WarehouseSink>,
        queue_capacity: usize,
        metrics: Arc<Metrics>,
    ) -> (Arc<Self>, tokio::task::JoinHandle<()>) {
        let (work_tx, work_rx) = mpsc::channel(queue_capacity);
        let worker_metrics = metrics.clone();
        let handle = tokio::spawn(run_worker(work_rx, bus, market_context_topic, warehouse, worker_metrics));

        let state = Arc::new(Self {
            work_tx,
            aggregator: Arc::new(SentimentAggregator::new()),
            metrics,
        });
        (state, handle)
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<WorkItem>,
    bus: Arc<dyn TopicBus>,
    topic: String,
    warehouse: Arc<dyn WarehouseSink>,
    metrics: Arc<Metrics>,
) {
    while let Some(item) = rx.recv().await {
        let bus = bus.clone();
        let topic = topic.clone();
        let warehouse = warehouse.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let context = item.context;
            let publish = publish_context(&bus, &topic, &context);
            let warehouse_payload = match serde_json::to_value(&context) {
                Ok(v) => v,
                Err(e) => {
                    error!(context_id = %context.context_id, error = %e, "failed to serialize market context for warehouse insert");
                    return;
                }
            };
            let insert = warehouse.insert_market_context(context.context_id, warehouse_payload);

            let (publish_result, ()) = tokio::join!(publish, insert);
            if let Err(detail) = publish_result {
                error!(context_id = %context.context_id, error = %detail, "failed to publish market context");
            }
            metrics.record_collection("market-context-worker", 1);
        });
    }
}

/// Push-subscription delivery envelope, mirroring the shape a managed
/// pub/sub push endpoint actually sends: base64 payload plus an opaque
/// message id used only for logging.
#[derive(Debug, Deserialize)]
struct PushEnvelope {
    message: PushMessage,
}

#[derive(Debug, Deserialize)]
struct PushMessage {
    data: String,
    #[serde(default)]
    message_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct AckResponse {
    context_id: Uuid,
}

enum HandlerError {
    Malformed(String),
    Backpressure,
    Processing(String),
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        match self {
            HandlerError::Malformed(detail) => (StatusCode::BAD_REQUEST, detail).into_response(),
            HandlerError::Backpressure => {
                let mut response = (StatusCode::TOO_MANY_REQUESTS, "queue at capacity").into_response();
                response.headers_mut().insert("Retry-After", "1".parse().unwrap());
                response
            }
            HandlerError::Processing(detail) => (StatusCode::INTERNAL_SERVER_ERROR, detail).into_response(),
        }
    }
}

pub async fn push_handler(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<PushEnvelope>,
) -> Result<Json<AckResponse>, HandlerError> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(&envelope.message.data)
        .map_err(|e| {
            state.metrics.record_push_response("400");
            HandlerError::Malformed(format!("invalid base64 payload: {e}"))
        })?;

    let processed: ProcessedSentiment = serde_json::from_slice(&raw).map_err(|e| {
        state.metrics.record_push_response("400");
        HandlerError::Malformed(format!("invalid ProcessedSentiment payload: {e}"))
    })?;

    if let Some(message_id) = &envelope.message.message_id {
        tracing::debug!(message_id, event_id = %processed.event_id, "received push message");
    }

    state.aggregator.record(&processed);
    let context = build_context(&processed);
    let context_id = context.context_id;

    match state.work_tx.try_send(WorkItem { context }) {
        Ok(()) => {
            state.metrics.record_push_response("200");
            Ok(Json(AckResponse { context_id }))
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            state.metrics.record_push_response("429");
            warn!("push handler backpressure, work queue full");
            Err(HandlerError::Backpressure)
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            state.metrics.record_push_response("500");
            Err(HandlerError::Processing("work queue closed".to_string()))
        }
    }
}

fn build_context(processed: &ProcessedSentiment) -> MarketContextEvent {
    MarketContextEvent {
        context_id: Uuid::new_v4(),
        event_id: processed.event_id,
        symbol: processed.symbol.clone(),
        market_type: processed.market_type.clone(),
        sentiment_score: processed.sentiment.score,
        sentiment_label: processed.sentiment.label,
        source: processed.source.clone(),
        timestamp: processed.timestamp,
        tenant_id: None,
    }
}

async fn publish_context(bus: &Arc<dyn TopicBus>, topic: &str, context: &MarketContextEvent) -> Result<(), String> {
    let data = serde_json::to_vec(context).map_err(|e| e.to_string())?;
    let mut attributes = BTreeMap::new();
    attributes.insert("event_type".to_string(), "market_context".to_string());
    attributes.insert("symbol".to_string(), context.symbol.clone());
    attributes.insert("market_type".to_string(), context.market_type.clone());

    bus.publish(topic, BusMessage { data, attributes }).await?;
    Ok(())
}

/// Publishes a batch of detected anomalies to the `anomalies` topic,
/// mirroring the original's `publish_anomaly` call site.
pub async fn publish_anomalies(bus: &Arc<dyn TopicBus>, topic: &str, anomalies: &[AnomalyDetection]) {
    for detection in anomalies {
        let Ok(data) = serde_json::to_vec(detection) else {
            continue;
        };
        let mut attributes = BTreeMap::new();
        attributes.insert("event_type".to_string(), "anomaly".to_string());
        attributes.insert("symbol".to_string(), detection.symbol.clone());
        attributes.insert("severity".to_string(), format!("{:?}", detection.severity).to_lowercase());
        if let Err(detail) = bus.publish(topic, BusMessage { data, attributes }).await {
            error!(symbol = %detection.symbol, error = %detail, "failed to publish anomaly");
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegimeRequest {
    pub symbol: String,
    pub market_type: String,
    pub prices: Vec<f64>,
}

pub async fn analyze_regime(Json(req): Json<RegimeRequest>) -> impl IntoResponse {
    let result = regime::detect_regime(&req.prices, &req.symbol, &req.market_type);
    Json(result)
}

#[derive(Debug, Deserialize)]
pub struct AnomalyRequest {
    pub symbol: String,
    pub market_type: String,
    pub prices: Vec<f64>,
    #[serde(default)]
    pub sentiments: Option<Vec<f64>>,
    #[serde(default)]
    pub volumes: Option<Vec<f64>>,
    #[serde(default)]
    pub timestamps: Option<Vec<DateTime<Utc>>>,
    #[serde(default)]
    pub support_level: Option<f64>,
    #[serde(default)]
    pub resistance_level: Option<f64>,
}

pub async fn analyze_anomalies(Json(req): Json<AnomalyRequest>) -> impl IntoResponse {
    let result = anomaly::detect_anomalies(
        &req.prices,
        req.sentiments.as_deref(),
        req.volumes.as_deref(),
        req.timestamps.as_deref(),
        &req.symbol,
        &req.market_type,
        req.support_level,
        req.resistance_level,
    );
    Json(result)
}

#[derive(Debug, Deserialize)]
pub struct CorrelationRequest {
    pub primary_symbol: String,
    pub secondary_symbol: String,
    pub primary_prices: Vec<f64>,
    pub secondary_prices: Vec<f64>,
    pub period_days: u32,
    #[serde(default)]
    pub calculate_lag: bool,
}

pub async fn analyze_correlation(Json(req): Json<CorrelationRequest>) -> Response {
    match correlation::calculate_correlation(
        &req.primary_prices,
        &req.secondary_prices,
        &req.primary_symbol,
        &req.secondary_symbol,
        req.period_days,
        req.calculate_lag,
    ) {
        Ok(result) => Json(result).into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct GrangerRequest {
    pub symbol: String,
    pub prices: Vec<f64>,
    pub sentiments: Vec<f64>,
    pub max_lag_hours: u32,
}

pub async fn analyze_granger(Json(req): Json<GrangerRequest>) -> Response {
    match correlation::analyze_sentiment_price_causality(&req.prices, &req.sentiments, &req.symbol, req.max_lag_hours) {
        Ok(result) => Json(result).into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

pub async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.work_tx.is_closed() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/pubsub-push/processed-sentiment", post(push_handler))
        .route("/analyze/regime", post(analyze_regime))
        .route("/analyze/anomalies", post(analyze_anomalies))
        .route("/analyze/correlation", post(analyze_correlation))
        .route("/analyze/granger", post(analyze_granger))
        .route("/health", axum::routing::get(health))
        .route("/ready", axum::routing::get(ready))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::topic_bus::{InMemoryTopicBus, Subscriber};
    use crate::models::{Sentiment, SentimentLabel};
    use crate::processor::warehouse::InMemoryWarehouseSink;
    use async_trait::async_trait;
    use tokio::sync::Mutex as TokioMutex;

    struct CapturingSubscriber {
        captured: TokioMutex<Vec<BusMessage>>,
    }

    #[async_trait]
    impl Subscriber for CapturingSubscriber {
        async fn on_message(&self, _topic: &str, message: BusMessage) {
            self.captured.lock().await.push(message);
        }
    }

    fn sample_processed() -> ProcessedSentiment {
        ProcessedSentiment {
            event_id: Uuid::new_v4(),
            symbol: "BTC".to_string(),
            market_type: "crypto".to_string(),
            sentiment: Sentiment {
                score: 0.4,
                label: SentimentLabel::Positive,
                confidence: 0.9,
            },
            timestamp: Utc::now(),
            source: "rss".to_string(),
        }
    }

    fn envelope_for(processed: &ProcessedSentiment) -> PushEnvelope {
        let payload = serde_json::to_vec(processed).unwrap();
        PushEnvelope {
            message: PushMessage {
                data: base64::engine::general_purpose::STANDARD.encode(payload),
                message_id: Some("m-1".to_string()),
            },
        }
    }

    #[tokio::test]
    async fn push_handler_enqueues_and_worker_publishes() {
        let bus: Arc<dyn TopicBus> = Arc::new(InMemoryTopicBus::new());
        let sub = Arc::new(CapturingSubscriber {
            captured: TokioMutex::new(Vec::new()),
        });
        bus.subscribe("test-market-context", sub.clone()).await;

        let warehouse: Arc<dyn WarehouseSink> = Arc::new(InMemoryWarehouseSink::new());
        let (state, _worker) = AppState::new(
            bus,
            "test-market-context".to_string(),
            warehouse.clone(),
            8,
            Arc::new(Metrics::new().unwrap()),
        );

        let response = push_handler(State(state), Json(envelope_for(&sample_processed()))).await;
        assert!(response.is_ok());

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let captured = sub.captured.lock().await;
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].attributes.get("symbol").unwrap(), "BTC");
    }

    #[tokio::test]
    async fn push_handler_rejects_malformed_base64() {
        let bus: Arc<dyn TopicBus> = Arc::new(InMemoryTopicBus::new());
        let warehouse: Arc<dyn WarehouseSink> = Arc::new(InMemoryWarehouseSink::new());
        let (state, _worker) = AppState::new(
            bus,
            "test-market-context".to_string(),
            warehouse,
            8,
            Arc::new(Metrics::new().unwrap()),
        );

        let envelope = PushEnvelope {
            message: PushMessage {
                data: "not valid base64!!".to_string(),
                message_id: None,
            },
        };

        let response = push_handler(State(state), Json(envelope)).await;
        assert!(response.is_err());
    }

    #[tokio::test]
    async fn push_handler_returns_backpressure_when_queue_is_full() {
        let bus: Arc<dyn TopicBus> = Arc::new(InMemoryTopicBus::new());
        let warehouse: Arc<dyn WarehouseSink> = Arc::new(InMemoryWarehouseSink::new());
        let (state, worker) = AppState::new(
            bus,
            "test-market-context".to_string(),
            warehouse,
            1,
            Arc::new(Metrics::new().unwrap()),
        );
        worker.abort();

        let first = push_handler(State(state.clone()), Json(envelope_for(&sample_processed()))).await;
        assert!(first.is_ok());

        let second = push_handler(State(state), Json(envelope_for(&sample_processed()))).await;
        assert!(second.is_err());
    }
}
