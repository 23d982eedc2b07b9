use std::collections::HashSet;
use std::io::Cursor;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rss::Channel;
use tokio::sync::Mutex;
use tracing::warn;

use crate::errors::ExternalServiceError;
use crate::ingestion::collector::EventCollector;
use crate::models::{DataSource, RawEvent};
use crate::symbols::extract_symbols;

/// Polls a single RSS feed URL, emitting one `RawEvent` per item not seen
/// on a prior poll. GUIDs (or, failing that, the item link) are the dedup
/// key; an item lacking both is treated as always-new.
pub struct RssNewsCollector {
    url: String,
    client: Client,
    seen_guids: Mutex<HashSet<String>>,
}

impl RssNewsCollector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
            seen_guids: Mutex::new(HashSet::new()),
        }
    }
}

#[async_trait]
impl EventCollector for RssNewsCollector {
    fn name(&self) -> &'static str {
        "rss"
    }

    async fn collect(&self) -> Result<Vec<RawEvent>, ExternalServiceError> {
        let response = self.client.get(&self.url).send().await.map_err(|e| ExternalServiceError {
            service: "rss".to_string(),
            status_code: None,
            details: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExternalServiceError {
                service: "rss".to_string(),
                status_code: Some(status.as_u16()),
                details: response.text().await.unwrap_or_default(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| ExternalServiceError {
            service: "rss".to_string(),
            status_code: None,
            details: e.to_string(),
        })?;

        let channel = Channel::read_from(Cursor::new(bytes)).map_err(|e| ExternalServiceError {
            service: "rss".to_string(),
            status_code: None,
            details: e.to_string(),
        })?;

        let mut seen = self.seen_guids.lock().await;
        let mut events = Vec::new();

        for item in channel.items() {
            let key = item
                .guid()
                .map(|g| g.value.to_string())
                .or_else(|| item.link().map(|l| l.to_string()));

            let Some(key) = key else {
                warn!("rss item has neither guid nor link, skipping dedup");
                continue;
            };

            if seen.contains(&key) {
                continue;
            }
            seen.insert(key.clone());

            let title = item.title().unwrap_or("").to_string();
            let description = item.description().unwrap_or("").to_string();
            let content = format!("{title}. {description}");

            let published_at = item
                .pub_date()
                .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
                .map(|d| d.with_timezone(&Utc));

            let mut event = RawEvent::new(DataSource::Rss, key, content.clone());
            event.title = Some(title);
            event.url = item.link().map(|l| l.to_string());
            event.published_at = published_at;
            event.symbols = extract_symbols(&content);

            events.push(event);
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_collect_on_empty_feed_yields_no_duplicates() {
        let collector = RssNewsCollector::new("http://localhost:1/does-not-matter");
        // No network call is made in this test; it only exercises dedup
        // bookkeeping directly.
        let mut seen = collector.seen_guids.lock().await;
        seen.insert("guid-1".to_string());
        assert!(seen.contains("guid-1"));
    }
}
