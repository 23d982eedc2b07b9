use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// A single message as seen by a subscriber, mirroring a push-subscription
/// delivery envelope: opaque payload bytes plus string attributes.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub data: Vec<u8>,
    pub attributes: BTreeMap<String, String>,
}

/// Broker-assigned identifier for a published message.
pub type MessageId = String;

#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn on_message(&self, topic: &str, message: BusMessage);
}

/// Fan-out topic bus. Shape follows a classic in-process event bus:
/// subscribers register under a topic name and are invoked in registration
/// order on every publish. `publish` is fallible so a real broker's
/// rejection (quota, connection loss, serialization on the wire) can
/// propagate to the caller instead of being swallowed.
#[async_trait]
pub trait TopicBus: Send + Sync {
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<MessageId, String>;

    async fn subscribe(&self, topic: &str, subscriber: Arc<dyn Subscriber>);
}

pub struct InMemoryTopicBus {
    subscribers: RwLock<BTreeMap<String, Vec<Arc<dyn Subscriber>>>>,
}

impl InMemoryTopicBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for InMemoryTopicBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TopicBus for InMemoryTopicBus {
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<MessageId, String> {
        let message_id = Uuid::new_v4().to_string();
        let subscribers = self.subscribers.read().await;
        let Some(subs) = subscribers.get(topic) else {
            debug!(topic, "publish with no subscribers");
            return Ok(message_id);
        };
        for sub in subs {
            sub.on_message(topic, message.clone()).await;
        }
        Ok(message_id)
    }

    async fn subscribe(&self, topic: &str, subscriber: Arc<dyn Subscriber>) {
        let mut subscribers = self.subscribers.write().await;
        subscribers.entry(topic.to_string()).or_default().push(subscriber);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSubscriber {
        count: AtomicUsize,
    }

    #[async_trait]
    impl Subscriber for CountingSubscriber {
        async fn on_message(&self, _topic: &str, _message: BusMessage) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn publish_reaches_all_subscribers_on_topic() {
        let bus = InMemoryTopicBus::new();
        let sub = Arc::new(CountingSubscriber {
            count: AtomicUsize::new(0),
        });
        bus.subscribe("raw-events", sub.clone()).await;

        let message_id = bus
            .publish(
                "raw-events",
                BusMessage {
                    data: b"hi".to_vec(),
                    attributes: BTreeMap::new(),
                },
            )
            .await
            .unwrap();

        assert!(!message_id.is_empty());
        assert_eq!(sub.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn publish_to_unknown_topic_is_a_noop() {
        let bus = InMemoryTopicBus::new();
        let result = bus
            .publish(
                "nothing-here",
                BusMessage {
                    data: vec![],
                    attributes: BTreeMap::new(),
                },
            )
            .await;
        assert!(result.is_ok());
    }
}
