use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

/// Append-only analytical sink. Expected to be transactionally durable and
/// idempotent on `event_id` / `context_id` in a real deployment; this is an
/// interface only, per the warehouse's place as an external collaborator.
#[async_trait]
pub trait WarehouseSink: Send + Sync {
    async fn insert_market_context(&self, context_id: Uuid, payload: Value);

    async fn insert_raw_event(&self, event_id: Uuid, payload: Value);
}

/// In-process stand-in used by tests and single-instance deployments that
/// don't yet have a warehouse attached. Idempotent on the id key.
pub struct InMemoryWarehouseSink {
    market_context: DashMap<Uuid, Value>,
    raw_events: DashMap<Uuid, Value>,
}

impl InMemoryWarehouseSink {
    pub fn new() -> Self {
        Self {
            market_context: DashMap::new(),
            raw_events: DashMap::new(),
        }
    }

    pub fn market_context_count(&self) -> usize {
        self.market_context.len()
    }

    pub fn raw_event_count(&self) -> usize {
        self.raw_events.len()
    }
}

impl Default for InMemoryWarehouseSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WarehouseSink for InMemoryWarehouseSink {
    async fn insert_market_context(&self, context_id: Uuid, payload: Value) {
        self.market_context.insert(context_id, payload);
    }

    async fn insert_raw_event(&self, event_id: Uuid, payload: Value) {
        self.raw_events.insert(event_id, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_is_idempotent_on_context_id() {
        let sink = InMemoryWarehouseSink::new();
        let id = Uuid::new_v4();
        sink.insert_market_context(id, json!({"v": 1})).await;
        sink.insert_market_context(id, json!({"v": 2})).await;
        assert_eq!(sink.market_context_count(), 1);
    }
}
