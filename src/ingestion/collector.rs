use async_trait::async_trait;
use serde::Serialize;

use crate::errors::ExternalServiceError;
use crate::models::RawEvent;

/// Result of a single collection tick, independent of publish outcome.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionReport {
    pub source: &'static str,
    pub events_collected: usize,
}

/// Result of handing a batch of events to the publisher. Mirrors
/// `PubSubError`'s shape so it can be reported without being an error when
/// the batch is a full success.
#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub first_errors: Vec<String>,
}

impl PublishReport {
    pub fn all_ok(total: usize) -> Self {
        Self {
            total,
            succeeded: total,
            failed: 0,
            first_errors: Vec::new(),
        }
    }

    pub fn record_failure(&mut self, detail: String) {
        self.failed += 1;
        if self.succeeded > 0 {
            self.succeeded -= 1;
        }
        if self.first_errors.len() < 5 {
            self.first_errors.push(detail);
        }
    }
}

/// A poll-driven data source. Implementors perform one network round trip
/// (or a bounded handful) per call and return whatever new events exist.
///
/// Every collector shares the same lifecycle: `initialize` before the first
/// tick, `collect` on each tick, `close` on shutdown, `health` for the
/// admin/readiness surface. Most collectors have nothing to set up beyond
/// the HTTP client already held at construction, so `initialize`/`close`
/// default to no-ops and `health` defaults to `true`; override them when a
/// collector owns a resource that genuinely needs acquire/release.
#[async_trait]
pub trait EventCollector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn initialize(&self) -> Result<(), ExternalServiceError> {
        Ok(())
    }

    async fn collect(&self) -> Result<Vec<RawEvent>, ExternalServiceError>;

    async fn close(&self) -> Result<(), ExternalServiceError> {
        Ok(())
    }

    async fn health(&self) -> bool {
        true
    }
}

/// A long-lived push source (websocket feeds). Implementors own their own
/// reconnect loop and push events onto the provided sink as they arrive.
/// `start_stream` runs until the sink is dropped or the connection is asked
/// to stop; `stop_stream` is the caller-facing half of that handshake and
/// defaults to a no-op since the usual way to stop a stream is to drop (or
/// abort the task holding) its sink.
#[async_trait]
pub trait StreamingCollector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn start_stream(&self, sink: tokio::sync::mpsc::Sender<RawEvent>) -> Result<(), ExternalServiceError>;

    async fn stop_stream(&self) -> Result<(), ExternalServiceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_report_all_ok_has_zero_failures() {
        let report = PublishReport::all_ok(10);
        assert_eq!(report.succeeded, 10);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn record_failure_caps_first_errors_at_five() {
        let mut report = PublishReport::all_ok(10);
        for i in 0..8 {
            report.record_failure(format!("err {i}"));
        }
        assert_eq!(report.first_errors.len(), 5);
        assert_eq!(report.failed, 8);
    }
}
