use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::errors::ExternalServiceError;
use crate::ingestion::collector::EventCollector;
use crate::models::{DataSource, RawEvent};
use crate::symbols::extract_symbols;

#[derive(Debug, Deserialize)]
struct ListingPayload {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    children: Vec<PostWrapper>,
}

#[derive(Debug, Deserialize)]
struct PostWrapper {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    id: String,
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    permalink: Option<String>,
}

/// Collects recent posts from a single social listing endpoint (a
/// subreddit's new-post feed). Every post that mentions a canonical symbol
/// becomes an event; posts with no recognizable symbol are dropped, since
/// downstream analysis is always symbol-scoped.
pub struct SocialCollector {
    client: Client,
    base_url: String,
    subreddit: String,
    limit: u32,
}

impl SocialCollector {
    pub fn new(base_url: impl Into<String>, subreddit: impl Into<String>, limit: u32) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            subreddit: subreddit.into(),
            limit,
        }
    }
}

#[async_trait]
impl EventCollector for SocialCollector {
    fn name(&self) -> &'static str {
        "social"
    }

    async fn collect(&self) -> Result<Vec<RawEvent>, ExternalServiceError> {
        let url = format!("{}/r/{}/new.json", self.base_url, self.subreddit);

        let response = self
            .client
            .get(&url)
            .query(&[("limit", self.limit.to_string())])
            .header("User-Agent", "sentinel-ingest/0.1")
            .send()
            .await
            .map_err(|e| ExternalServiceError {
                service: "social".to_string(),
                status_code: None,
                details: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExternalServiceError {
                service: "social".to_string(),
                status_code: Some(status.as_u16()),
                details: response.text().await.unwrap_or_default(),
            });
        }

        let payload: ListingPayload = response.json().await.map_err(|e| ExternalServiceError {
            service: "social".to_string(),
            status_code: Some(status.as_u16()),
            details: e.to_string(),
        })?;

        let events = payload
            .data
            .children
            .into_iter()
            .filter_map(|wrapper| {
                let post = wrapper.data;
                let content = format!("{} {}", post.title, post.selftext);
                let symbols = extract_symbols(&content);
                if symbols.is_empty() {
                    return None;
                }

                let mut event = RawEvent::new(DataSource::Social, post.id, content);
                event.title = Some(post.title);
                event.author = post.author;
                event.url = post.permalink.map(|p| format!("https://reddit.com{p}"));
                event.symbols = symbols;
                Some(event)
            })
            .collect();

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_name_is_social() {
        let collector = SocialCollector::new("http://localhost", "cryptocurrency", 25);
        assert_eq!(collector.name(), "social");
    }
}
