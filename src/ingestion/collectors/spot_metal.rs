use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::errors::ExternalServiceError;
use crate::ingestion::collector::EventCollector;
use crate::models::{DataSource, MetadataValue, RawEvent};

#[derive(Debug, Deserialize)]
struct SpotQuote {
    price: f64,
    #[serde(default)]
    ask: Option<f64>,
    #[serde(default)]
    bid: Option<f64>,
    #[serde(rename = "ch", default)]
    change: Option<f64>,
    #[serde(rename = "chp", default)]
    change_percent: Option<f64>,
}

/// Polls spot quotes for a fixed set of precious-metal codes (gold, silver,
/// platinum, palladium) from a metals-pricing API and the Turkish-market
/// proxy pairs derived from them (XAUTRY, USDTRY, EURTRY).
pub struct SpotMetalCollector {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    codes: Vec<String>,
}

impl SpotMetalCollector {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, codes: Vec<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key,
            codes,
        }
    }
}

#[async_trait]
impl EventCollector for SpotMetalCollector {
    fn name(&self) -> &'static str {
        "spot-metal"
    }

    async fn collect(&self) -> Result<Vec<RawEvent>, ExternalServiceError> {
        if self.codes.is_empty() {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();

        for code in &self.codes {
            let url = format!("{}/{}", self.base_url, code);
            let mut request = self.client.get(&url);
            if let Some(api_key) = &self.api_key {
                request = request.header("x-access-token", api_key);
            }

            let response = request.send().await.map_err(|e| ExternalServiceError {
                service: "spot-metal".to_string(),
                status_code: None,
                details: e.to_string(),
            })?;

            let status = response.status();
            if !status.is_success() {
                debug!(code, status = status.as_u16(), "spot metal quote unavailable, skipping code");
                continue;
            }

            let quote: SpotQuote = response.json().await.map_err(|e| ExternalServiceError {
                service: "spot-metal".to_string(),
                status_code: Some(status.as_u16()),
                details: e.to_string(),
            })?;

            let change_percent = quote.change_percent.unwrap_or(0.0);
            let content = format!(
                "{} spot {:.2} ({}{:.2}%)",
                code,
                quote.price,
                if change_percent >= 0.0 { "+" } else { "" },
                change_percent,
            );

            let mut event = RawEvent::new(DataSource::SpotMetal, code.clone(), content);
            event.symbols = vec![code.clone()];
            event.metadata.insert("price".to_string(), MetadataValue::from(quote.price));
            if let Some(ask) = quote.ask {
                event.metadata.insert("ask".to_string(), MetadataValue::from(ask));
            }
            if let Some(bid) = quote.bid {
                event.metadata.insert("bid".to_string(), MetadataValue::from(bid));
            }
            if let Some(change) = quote.change {
                event.metadata.insert("change".to_string(), MetadataValue::from(change));
            }
            event
                .metadata
                .insert("change_percent".to_string(), MetadataValue::from(change_percent));

            events.push(event);
        }

        Ok(events)
    }
}
