//! Ingestion service - polls external market data sources and republishes
//! them as raw events, plus a small admin HTTP surface for operators.
//!
//! # Usage
//! ```sh
//! cargo run --bin ingestion
//! ```
//!
//! # Environment Variables
//! See `sentinel_ingest::config::Config` for the full list. Each collector
//! is opt-in via `ENABLE_<NAME>_COLLECTOR=true`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use tracing::{Level, info, warn};
use tracing_subscriber::prelude::*;

use sentinel_ingest::config::Config;
use sentinel_ingest::ingestion::collector::EventCollector;
use sentinel_ingest::ingestion::collectors::central_bank::CentralBankCollector;
use sentinel_ingest::ingestion::collectors::exchange::{ExchangeStreamCollector, ExchangeTickerCollector};
use sentinel_ingest::ingestion::collectors::rss::RssNewsCollector;
use sentinel_ingest::ingestion::collectors::social::SocialCollector;
use sentinel_ingest::ingestion::collectors::spot_metal::SpotMetalCollector;
use sentinel_ingest::ingestion::http_client;
use sentinel_ingest::ingestion::publisher::EventPublisher;
use sentinel_ingest::ingestion::quota::QuotaCounter;
use sentinel_ingest::ingestion::scheduler::CollectionScheduler;
use sentinel_ingest::ingestion::topic_bus::{InMemoryTopicBus, TopicBus};
use sentinel_ingest::symbols::CANONICAL_SYMBOLS;

struct AdminState {
    scheduler: Arc<CollectionScheduler>,
    admin_api_key: Option<String>,
}

fn require_admin_key(headers: &HeaderMap, state: &AdminState) -> Result<(), StatusCode> {
    let Some(expected) = &state.admin_api_key else {
        return Ok(());
    };
    let provided = headers.get("X-API-Key").and_then(|v| v.to_str().ok());
    if provided == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

fn core_error_response(err: &sentinel_ingest::errors::CoreError) -> axum::response::Response {
    use sentinel_ingest::errors::CoreError;
    match err {
        CoreError::CircuitBreakerOpen(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({ "detail": err.to_string() }))).into_response()
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "detail": err.to_string() }))).into_response(),
    }
}

async fn trigger_collector(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(status) = require_admin_key(&headers, &state) {
        return status.into_response();
    }
    match state.scheduler.trigger(&name).await {
        Some(Ok(collected)) => {
            Json(serde_json::json!({ "status": "success", "collected": collected, "source": name })).into_response()
        }
        Some(Err(err)) => core_error_response(&err),
        None => (StatusCode::NOT_FOUND, format!("unknown collector: {name}")).into_response(),
    }
}

async fn trigger_all_collectors(State(state): State<Arc<AdminState>>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(status) = require_admin_key(&headers, &state) {
        return status.into_response();
    }
    let results = state.scheduler.trigger_all().await;
    let body: serde_json::Map<String, serde_json::Value> = results
        .into_iter()
        .map(|(name, result)| {
            let value = match result {
                Ok(collected) => serde_json::json!({ "status": "success", "collected": collected, "source": name }),
                Err(err) => serde_json::json!({ "status": "error", "detail": err.to_string(), "source": name }),
            };
            (name, value)
        })
        .collect();
    Json(body).into_response()
}

async fn scheduler_status(State(state): State<Arc<AdminState>>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(status) = require_admin_key(&headers, &state) {
        return status.into_response();
    }
    Json(state.scheduler.status_snapshot().await).into_response()
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(fmt_layer)
        .init();

    info!("ingestion service {} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(topic_prefix = %config.topic_prefix, "configuration loaded");

    let bus: Arc<dyn TopicBus> = Arc::new(InMemoryTopicBus::new());
    let publisher = Arc::new(EventPublisher::new(bus, &config.topic_prefix));
    let quota = Arc::new(QuotaCounter::new(config.daily_quota_limit));

    let mut scheduler = CollectionScheduler::new(
        publisher,
        quota,
        Duration::from_secs(config.scheduler_shutdown_grace_seconds),
    );

    let breaker_threshold = config.breaker_failure_threshold;
    let breaker_reset = Duration::from_secs(config.breaker_reset_timeout_seconds);

    if config.rss.enabled {
        let url = std::env::var("RSS_FEED_URL").unwrap_or_else(|_| "https://example.com/feed.xml".to_string());
        let collector: Arc<dyn EventCollector> = Arc::new(RssNewsCollector::new(url));
        scheduler.register(
            collector,
            breaker_threshold,
            breaker_reset,
            Duration::from_secs(config.rss.poll_interval_seconds),
        );
        info!("rss collector registered");
    }

    if config.spot_metal.enabled {
        let base_url = std::env::var("SPOT_METAL_BASE_URL").unwrap_or_else(|_| "https://example.com".to_string());
        let codes = vec!["XAU".to_string(), "XAG".to_string()];
        let collector: Arc<dyn EventCollector> = Arc::new(SpotMetalCollector::new(
            base_url,
            config.spot_metal.api_key.clone(),
            codes,
        ));
        scheduler.register(
            collector,
            breaker_threshold,
            breaker_reset,
            Duration::from_secs(config.spot_metal.poll_interval_seconds),
        );
        info!("spot metal collector registered");
    }

    if config.central_bank.enabled {
        let base_url = std::env::var("CENTRAL_BANK_BASE_URL").unwrap_or_else(|_| "https://example.com".to_string());
        let watched: Vec<String> = CANONICAL_SYMBOLS.iter().map(|s| s.to_string()).collect();
        let collector: Arc<dyn EventCollector> = Arc::new(CentralBankCollector::new(
            base_url,
            config.central_bank.api_key.clone(),
            watched,
        ));
        scheduler.register(
            collector,
            breaker_threshold,
            breaker_reset,
            Duration::from_secs(config.central_bank.poll_interval_seconds),
        );
        info!("central bank collector registered");
    }

    if config.social.enabled {
        let base_url = std::env::var("SOCIAL_BASE_URL").unwrap_or_else(|_| "https://www.reddit.com".to_string());
        let subreddit = std::env::var("SOCIAL_SUBREDDIT").unwrap_or_else(|_| "CryptoCurrency".to_string());
        let collector: Arc<dyn EventCollector> = Arc::new(SocialCollector::new(base_url, subreddit, 25));
        scheduler.register(
            collector,
            breaker_threshold,
            breaker_reset,
            Duration::from_secs(config.social.poll_interval_seconds),
        );
        info!("social collector registered");
    }

    if config.exchange.enabled {
        let base_url = std::env::var("EXCHANGE_BASE_URL").unwrap_or_else(|_| "https://api.binance.com".to_string());
        let pairs: Vec<String> = CANONICAL_SYMBOLS
            .iter()
            .filter(|s| !s.starts_with('X') && !s.ends_with("TRY"))
            .map(|s| format!("{s}USDT"))
            .collect();
        let requests_per_minute: u32 = std::env::var("EXCHANGE_REQUESTS_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1200);
        let collector: Arc<dyn EventCollector> = Arc::new(ExchangeTickerCollector::new(
            http_client::build_client(),
            base_url,
            config.exchange.api_key.clone(),
            pairs,
            requests_per_minute,
        ));
        scheduler.register(
            collector,
            breaker_threshold,
            breaker_reset,
            Duration::from_secs(config.exchange.poll_interval_seconds),
        );
        info!("exchange collector registered");

        if let Ok(ws_url) = std::env::var("EXCHANGE_WS_URL") {
            scheduler.register_stream(Arc::new(ExchangeStreamCollector::new(ws_url)));
            info!("exchange stream collector registered");
        }
    } else {
        warn!("exchange collector disabled; set ENABLE_EXCHANGE_COLLECTOR=true to enable");
    }

    let scheduler = Arc::new(scheduler);
    let handles = scheduler.start();

    let admin_state = Arc::new(AdminState {
        scheduler: scheduler.clone(),
        admin_api_key: config.admin_api_key.clone(),
    });

    let app = Router::new()
        .route("/collect/all", post(trigger_all_collectors))
        .route("/collect/{name}", post(trigger_collector))
        .route("/scheduler/status", get(scheduler_status))
        .route("/health", get(health))
        .with_state(admin_state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.admin_port)).await?;
    info!(port = config.admin_port, "admin HTTP surface listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(err) = result {
                warn!(error = %err, "admin HTTP server exited");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    scheduler.shutdown(handles).await;
    info!("ingestion service stopped");

    Ok(())
}
