use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::errors::ExternalServiceError;
use crate::ingestion::collector::EventCollector;
use crate::models::{DataSource, MetadataValue, RawEvent};

#[derive(Debug, Deserialize)]
struct AnnouncementPayload {
    announcements: Vec<Announcement>,
}

#[derive(Debug, Deserialize)]
struct Announcement {
    id: String,
    title: String,
    summary: String,
    #[serde(default)]
    policy_rate_percent: Option<f64>,
}

/// Polls a central bank's press-release feed for policy announcements
/// (rate decisions, statements). Each announcement becomes one event
/// tagged with the currency's symbols so it flows into correlation and
/// regime analysis for that market.
pub struct CentralBankCollector {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    watched_symbols: Vec<String>,
}

impl CentralBankCollector {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, watched_symbols: Vec<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key,
            watched_symbols,
        }
    }
}

#[async_trait]
impl EventCollector for CentralBankCollector {
    fn name(&self) -> &'static str {
        "central-bank"
    }

    async fn collect(&self) -> Result<Vec<RawEvent>, ExternalServiceError> {
        let mut request = self.client.get(&self.base_url);
        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }

        let response = request.send().await.map_err(|e| ExternalServiceError {
            service: "central-bank".to_string(),
            status_code: None,
            details: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExternalServiceError {
                service: "central-bank".to_string(),
                status_code: Some(status.as_u16()),
                details: response.text().await.unwrap_or_default(),
            });
        }

        let payload: AnnouncementPayload = response.json().await.map_err(|e| ExternalServiceError {
            service: "central-bank".to_string(),
            status_code: Some(status.as_u16()),
            details: e.to_string(),
        })?;

        let events = payload
            .announcements
            .into_iter()
            .map(|announcement| {
                let content = format!("{}. {}", announcement.title, announcement.summary);
                let mut event = RawEvent::new(DataSource::CentralBank, announcement.id, content);
                event.title = Some(announcement.title);
                event.symbols = self.watched_symbols.clone();
                if let Some(rate) = announcement.policy_rate_percent {
                    event
                        .metadata
                        .insert("policy_rate_percent".to_string(), MetadataValue::from(rate));
                }
                event
            })
            .collect();

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_name_is_central_bank() {
        let collector = CentralBankCollector::new("http://localhost", None, vec![]);
        assert_eq!(collector.name(), "central-bank");
    }
}
