//! Prometheus metrics for the ingestion and market-context pipeline.
//!
//! All metrics use the `sentinel_` prefix and are read-only outside this module.

use prometheus::{
    CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGaugeVec},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Events collected per collector per tick.
    pub collector_events_total: CounterVec,
    /// Collection failures per collector.
    pub collector_failures_total: CounterVec,
    /// Circuit breaker state per collector (0=closed, 1=half-open, 2=open).
    pub circuit_breaker_status: GenericGaugeVec<AtomicF64>,
    /// Depth of the push-consumer's in-flight work queue.
    pub push_queue_depth: GenericGaugeVec<AtomicF64>,
    /// Push handler responses by status class.
    pub push_handler_responses_total: CounterVec,
    /// Outbound HTTP latency per collector.
    pub collector_latency_seconds: HistogramVec,
    /// Regime/anomaly/correlation/Granger operator latency.
    pub operator_latency_seconds: HistogramVec,
    /// Anomalies emitted by severity.
    pub anomalies_total: CounterVec,
    /// Publisher batch outcomes.
    pub publish_batch_failures_total: CounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let collector_events_total = CounterVec::new(
            Opts::new("sentinel_collector_events_total", "Events accepted per collector tick"),
            &["collector"],
        )?;
        registry.register(Box::new(collector_events_total.clone()))?;

        let collector_failures_total = CounterVec::new(
            Opts::new("sentinel_collector_failures_total", "Collection failures per collector"),
            &["collector"],
        )?;
        registry.register(Box::new(collector_failures_total.clone()))?;

        let circuit_breaker_status = GaugeVec::new(
            Opts::new(
                "sentinel_circuit_breaker_status",
                "Circuit breaker state per collector (0=closed,1=half-open,2=open)",
            ),
            &["collector"],
        )?;
        registry.register(Box::new(circuit_breaker_status.clone()))?;

        let push_queue_depth = GaugeVec::new(
            Opts::new("sentinel_push_queue_depth", "In-flight push-consumer work items"),
            &["endpoint"],
        )?;
        registry.register(Box::new(push_queue_depth.clone()))?;

        let push_handler_responses_total = CounterVec::new(
            Opts::new("sentinel_push_handler_responses_total", "Push handler responses by status class"),
            &["status"],
        )?;
        registry.register(Box::new(push_handler_responses_total.clone()))?;

        let collector_latency_seconds = HistogramVec::new(
            HistogramOpts::new("sentinel_collector_latency_seconds", "Outbound collector HTTP latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["collector"],
        )?;
        registry.register(Box::new(collector_latency_seconds.clone()))?;

        let operator_latency_seconds = HistogramVec::new(
            HistogramOpts::new("sentinel_operator_latency_seconds", "Analysis operator compute latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5]),
            &["operator"],
        )?;
        registry.register(Box::new(operator_latency_seconds.clone()))?;

        let anomalies_total = CounterVec::new(
            Opts::new("sentinel_anomalies_total", "Anomalies emitted by severity"),
            &["severity"],
        )?;
        registry.register(Box::new(anomalies_total.clone()))?;

        let publish_batch_failures_total = CounterVec::new(
            Opts::new("sentinel_publish_batch_failures_total", "Per-event publish failures by collector"),
            &["collector"],
        )?;
        registry.register(Box::new(publish_batch_failures_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            collector_events_total,
            collector_failures_total,
            circuit_breaker_status,
            push_queue_depth,
            push_handler_responses_total,
            collector_latency_seconds,
            operator_latency_seconds,
            anomalies_total,
            publish_batch_failures_total,
        })
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode_to_string(&metric_families).unwrap_or_default()
    }

    pub fn record_collection(&self, collector: &str, events: usize) {
        self.collector_events_total.with_label_values(&[collector]).inc_by(events as f64);
    }

    pub fn record_failure(&self, collector: &str) {
        self.collector_failures_total.with_label_values(&[collector]).inc();
    }

    pub fn set_breaker_status(&self, collector: &str, value: f64) {
        self.circuit_breaker_status.with_label_values(&[collector]).set(value);
    }

    pub fn set_queue_depth(&self, endpoint: &str, depth: f64) {
        self.push_queue_depth.with_label_values(&[endpoint]).set(depth);
    }

    pub fn record_push_response(&self, status: &str) {
        self.push_handler_responses_total.with_label_values(&[status]).inc();
    }

    pub fn observe_collector_latency(&self, collector: &str, seconds: f64) {
        self.collector_latency_seconds.with_label_values(&[collector]).observe(seconds);
    }

    pub fn observe_operator_latency(&self, operator: &str, seconds: f64) {
        self.operator_latency_seconds.with_label_values(&[operator]).observe(seconds);
    }

    pub fn record_anomaly(&self, severity: &str) {
        self.anomalies_total.with_label_values(&[severity]).inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to construct default metrics registry")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_sentinel_prefix() {
        let metrics = Metrics::new().unwrap();
        assert!(metrics.render().contains("sentinel_"));
    }

    #[test]
    fn collector_event_counter_increments_by_batch_size() {
        let metrics = Metrics::new().unwrap();
        metrics.record_collection("rss", 3);
        let output = metrics.render();
        assert!(output.contains("sentinel_collector_events_total"));
        assert!(output.contains("rss"));
    }
}
