//! Market-context processor - consumes enriched sentiment events over a
//! push HTTP endpoint, derives per-symbol market context, and exposes the
//! pure analysis operators (regime, anomaly, correlation, causality) over
//! HTTP for on-demand queries.
//!
//! # Usage
//! ```sh
//! cargo run --bin market-context
//! ```

use std::sync::Arc;

use anyhow::Result;
use axum::{Router, routing::get};
use tracing::{Level, info, warn};
use tracing_subscriber::prelude::*;

use sentinel_ingest::config::Config;
use sentinel_ingest::ingestion::topic_bus::{InMemoryTopicBus, TopicBus};
use sentinel_ingest::observability::metrics::Metrics;
use sentinel_ingest::processor::handler::{self, AppState};
use sentinel_ingest::processor::warehouse::{InMemoryWarehouseSink, WarehouseSink};

async fn metrics_endpoint(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> String {
    state.metrics.render()
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(fmt_layer)
        .init();

    info!("market-context service {} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    let bus: Arc<dyn TopicBus> = Arc::new(InMemoryTopicBus::new());
    let warehouse: Arc<dyn WarehouseSink> = Arc::new(InMemoryWarehouseSink::new());

    let (state, _worker) = AppState::new(
        bus,
        format!("{}-market-context", config.topic_prefix),
        warehouse,
        config.push_queue_capacity,
        Arc::new(Metrics::new()?),
    );

    let metrics_router = Router::new()
        .route("/metrics", get(metrics_endpoint))
        .with_state(state.clone());
    let app = handler::router(state).merge(metrics_router);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.push_handler_port)).await?;
    info!(port = config.push_handler_port, "market-context HTTP surface listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(err) = result {
                warn!(error = %err, "market-context HTTP server exited");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    info!("market-context service stopped");
    Ok(())
}
