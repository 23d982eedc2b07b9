use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::errors::ExternalServiceError;
use crate::ingestion::backoff::BackoffTracker;
use crate::ingestion::collector::EventCollector;
use crate::models::{DataSource, MetadataValue, RawEvent};

/// 24hr ticker snapshot as returned by the exchange's REST API.
#[derive(Debug, Deserialize)]
struct Ticker24hr {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "priceChange")]
    price_change: String,
    #[serde(rename = "priceChangePercent")]
    price_change_percent: String,
}

/// Polls an exchange's 24hr ticker endpoint for a fixed watchlist of
/// trading pairs, applying per-symbol exponential backoff so one symbol's
/// repeated failures don't starve the rest of the pass.
pub struct ExchangeTickerCollector {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: Option<String>,
    pairs: Vec<String>,
    backoff: BackoffTracker,
    min_interval: Duration,
    last_request_time: Mutex<Option<Instant>>,
    blocked_until: RwLock<BTreeMap<String, Instant>>,
}

impl ExchangeTickerCollector {
    pub fn new(
        client: ClientWithMiddleware,
        base_url: impl Into<String>,
        api_key: Option<String>,
        pairs: Vec<String>,
        requests_per_minute: u32,
    ) -> Self {
        let min_interval = Duration::from_secs_f64(60.0 / requests_per_minute.max(1) as f64);
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            pairs,
            backoff: BackoffTracker::new(),
            min_interval,
            last_request_time: Mutex::new(None),
            blocked_until: RwLock::new(BTreeMap::new()),
        }
    }

    fn base_symbol(pair: &str) -> String {
        pair.trim_end_matches("USDT").to_string()
    }

    async fn throttle(&self) {
        let mut last = self.last_request_time.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn should_skip_for_backoff(&self, pair: &str) -> bool {
        let blocked_until = self.blocked_until.read().await.get(pair).copied();
        match blocked_until {
            Some(until) => Instant::now() < until,
            None => false,
        }
    }

    async fn fetch_one(&self, pair: &str) -> Result<Ticker24hr, ExternalServiceError> {
        self.throttle().await;

        let url = format!("{}/api/v3/ticker/24hr", self.base_url);
        let mut request = self.client.get(&url).query(&[("symbol", pair)]);
        if let Some(api_key) = &self.api_key {
            request = request.header("X-API-KEY", api_key);
        }

        let response = request.send().await.map_err(|e| ExternalServiceError {
            service: "exchange".to_string(),
            status_code: None,
            details: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExternalServiceError {
                service: "exchange".to_string(),
                status_code: Some(status.as_u16()),
                details: response.text().await.unwrap_or_default(),
            });
        }

        response.json::<Ticker24hr>().await.map_err(|e| ExternalServiceError {
            service: "exchange".to_string(),
            status_code: Some(status.as_u16()),
            details: e.to_string(),
        })
    }
}

#[async_trait]
impl EventCollector for ExchangeTickerCollector {
    fn name(&self) -> &'static str {
        "exchange"
    }

    async fn collect(&self) -> Result<Vec<RawEvent>, ExternalServiceError> {
        if self.pairs.is_empty() {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();

        for pair in &self.pairs {
            if self.backoff.retries(pair).await >= 5 {
                debug!(pair, "symbol skipped, backoff retry ceiling reached");
                continue;
            }

            if self.should_skip_for_backoff(pair).await {
                debug!(pair, "symbol skipped, within backoff window");
                continue;
            }

            match self.fetch_one(pair).await {
                Ok(ticker) => {
                    self.backoff.reset(pair).await;
                    self.blocked_until.write().await.remove(pair);

                    let symbol = Self::base_symbol(&ticker.symbol);
                    let change_percent: f64 = ticker.price_change_percent.parse().unwrap_or(0.0);
                    let content = format!(
                        "{} last price {} ({}{:.2}%)",
                        ticker.symbol,
                        ticker.last_price,
                        if change_percent >= 0.0 { "+" } else { "" },
                        change_percent,
                    );

                    let mut event = RawEvent::new(DataSource::Exchange, ticker.symbol.clone(), content);
                    event.symbols = vec![symbol];
                    event.metadata.insert(
                        "last_price".to_string(),
                        MetadataValue::from(ticker.last_price.parse::<f64>().unwrap_or(0.0)),
                    );
                    event.metadata.insert(
                        "price_change".to_string(),
                        MetadataValue::from(ticker.price_change.parse::<f64>().unwrap_or(0.0)),
                    );
                    event.metadata.insert(
                        "price_change_percent".to_string(),
                        MetadataValue::from(change_percent),
                    );

                    events.push(event);
                }
                Err(err) => {
                    warn!(pair, error = %err, "exchange ticker fetch failed, backing off");
                    let delay = self.backoff.next_delay(pair).await;
                    self.blocked_until
                        .write()
                        .await
                        .insert(pair.clone(), Instant::now() + delay);
                }
            }
        }

        Ok(events)
    }
}

/// Long-lived websocket streaming half, for exchanges that expose a push
/// feed in addition to the REST ticker. Held as a sibling collector rather
/// than folded into `ExchangeTickerCollector` so the scheduler can decide
/// per-deployment whether to run polling, streaming, or both.
pub struct ExchangeStreamCollector {
    ws_url: String,
}

impl ExchangeStreamCollector {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self { ws_url: ws_url.into() }
    }
}

#[async_trait]
impl crate::ingestion::collector::StreamingCollector for ExchangeStreamCollector {
    fn name(&self) -> &'static str {
        "exchange-stream"
    }

    async fn start_stream(&self, sink: tokio::sync::mpsc::Sender<RawEvent>) -> Result<(), ExternalServiceError> {
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);
        const RECONNECT_DELAY: Duration = Duration::from_secs(5);

        loop {
            info!(url = %self.ws_url, "connecting exchange websocket stream");
            let (ws_stream, _) = match connect_async(&self.ws_url).await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "websocket connect failed, reconnecting");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };

            let (mut write, mut read) = ws_stream.split();

            loop {
                match tokio::time::timeout(HEARTBEAT_TIMEOUT, read.next()).await {
                    Ok(Some(Ok(Message::Text(text)))) => {
                        if let Some(event) = Self::parse_frame(&text) {
                            if sink.send(event).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                    Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                        info!("websocket closed cleanly, reconnecting in 5s");
                        break;
                    }
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(e))) => {
                        warn!(error = %e, "websocket protocol error, reconnecting");
                        break;
                    }
                    Err(_elapsed) => {
                        if write.send(Message::Ping(Vec::new().into())).await.is_err() {
                            warn!("heartbeat ping failed, dropping connection");
                            break;
                        }
                    }
                }
            }

            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }
}

impl ExchangeStreamCollector {
    fn parse_frame(text: &str) -> Option<RawEvent> {
        let value: serde_json::Value = serde_json::from_str(text).ok()?;
        let symbol = value.get("s")?.as_str()?;
        let price = value.get("c")?.as_str()?;

        let mut event = RawEvent::new(
            DataSource::Exchange,
            format!("{symbol}:{price}"),
            format!("{symbol} trade price {price}"),
        );
        event.symbols = vec![Self::base_symbol(symbol)];
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest_middleware::ClientBuilder;

    fn test_client() -> ClientWithMiddleware {
        ClientBuilder::new(reqwest::Client::new()).build()
    }

    #[tokio::test]
    async fn empty_pair_list_collects_nothing() {
        let collector = ExchangeTickerCollector::new(test_client(), "http://localhost", None, vec![], 60);
        let events = collector.collect().await.unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn base_symbol_strips_usdt_suffix() {
        assert_eq!(ExchangeTickerCollector::base_symbol("BTCUSDT"), "BTC");
    }
}
