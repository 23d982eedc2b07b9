use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Open sum type for `RawEvent::metadata` values, strictly typed on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
    Map(BTreeMap<String, MetadataValue>),
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::String(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Integer(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Real(v)
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

/// Closed source vocabulary for `RawEvent::source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataSource {
    Exchange,
    NewsApi,
    Social,
    Rss,
    SpotMetal,
    CentralBank,
    EconomicIndicator,
    Custom,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Exchange => "exchange",
            DataSource::NewsApi => "news-api",
            DataSource::Social => "social",
            DataSource::Rss => "rss",
            DataSource::SpotMetal => "spot-metal",
            DataSource::CentralBank => "central-bank",
            DataSource::EconomicIndicator => "economic-indicator",
            DataSource::Custom => "custom",
        }
    }
}

/// The atom of ingestion. Immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub event_id: Uuid,
    pub source: DataSource,
    pub source_id: String,
    pub content: String,
    pub metadata: BTreeMap<String, MetadataValue>,
    pub collected_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub symbols: Vec<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub author: Option<String>,
    pub tenant_id: Option<String>,
}

impl RawEvent {
    pub fn new(source: DataSource, source_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            source,
            source_id: source_id.into(),
            content: content.into(),
            metadata: BTreeMap::new(),
            collected_at: Utc::now(),
            published_at: None,
            symbols: Vec::new(),
            title: None,
            url: None,
            author: None,
            tenant_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sentiment {
    pub score: f64,
    pub label: SentimentLabel,
    pub confidence: f64,
}

/// Consumed by the market-context processor; authored by an upstream
/// sentiment-enrichment collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedSentiment {
    pub event_id: Uuid,
    pub symbol: String,
    pub market_type: String,
    pub sentiment: Sentiment,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

/// Emitted by the processor per processed input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketContextEvent {
    pub context_id: Uuid,
    pub event_id: Uuid,
    pub symbol: String,
    pub market_type: String,
    pub sentiment_score: f64,
    pub sentiment_label: SentimentLabel,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub tenant_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketRegime {
    Bull,
    Bear,
    Neutral,
    Volatile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Sideways,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityRegime {
    Low,
    Medium,
    High,
    Extreme,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeAnalysis {
    pub symbol: String,
    pub market_type: String,
    pub regime: MarketRegime,
    pub trend_direction: TrendDirection,
    pub trend_strength: f64,
    pub volatility_regime: VolatilityRegime,
    pub confidence: f64,
    pub rsi_14: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub ema_20: Option<f64>,
    pub support_level: Option<f64>,
    pub resistance_level: Option<f64>,
    pub sample_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    PriceSentimentDivergence,
    SuddenPriceMove,
    VolumeSpike,
    VolatilitySpike,
    SupportBreak,
    ResistanceBreak,
    FlashCrash,
    FlashPump,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyDetection {
    pub anomaly_type: AnomalyType,
    pub severity: AnomalySeverity,
    pub symbol: String,
    pub market_type: String,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub recommendation: Option<String>,
    pub price_at_detection: f64,
    pub price_change_percent: f64,
    pub sentiment_score: Option<f64>,
    pub expected_sentiment: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub z_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStrength {
    VeryStrongNegative,
    StrongNegative,
    ModerateNegative,
    Weak,
    ModeratePositive,
    StrongPositive,
    VeryStrongPositive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingCorrelationPoint {
    pub index: usize,
    pub correlation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadLagSide {
    Primary,
    Secondary,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LagAnalysis {
    pub optimal_lag: i32,
    pub optimal_correlation: f64,
    pub leader: LeadLagSide,
    pub lagger: LeadLagSide,
    pub all_correlations: BTreeMap<i32, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub primary_symbol: String,
    pub secondary_symbol: String,
    pub correlation: f64,
    pub correlation_strength: CorrelationStrength,
    pub sample_size: usize,
    pub period_days: u32,
    pub rolling_correlations: Option<Vec<RollingCorrelationPoint>>,
    pub lag_analysis: Option<LagAnalysis>,
    pub interpretation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrangerCausalityResult {
    pub cause_variable: String,
    pub effect_variable: String,
    pub lag_hours: u32,
    pub f_statistic: f64,
    pub p_value: f64,
    pub is_causal: bool,
    pub interpretation: String,
}

/// Per-collector breaker state, exported in scheduler job snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub failure_count: usize,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub is_open: bool,
    pub threshold: usize,
    pub reset_timeout_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_event_json_round_trip() {
        let mut event = RawEvent::new(DataSource::Exchange, "BTCUSDT:123", "BTC moved");
        event.symbols = vec!["BTC".to_string()];
        event
            .metadata
            .insert("last_price".to_string(), MetadataValue::from(65000.0));

        let json = serde_json::to_string(&event).unwrap();
        let parsed: RawEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.event_id, event.event_id);
        assert_eq!(parsed.source_id, event.source_id);
        assert_eq!(parsed.symbols, event.symbols);
        assert_eq!(
            parsed.collected_at.timestamp_millis(),
            event.collected_at.timestamp_millis()
        );
    }

    #[test]
    fn data_source_wire_names_are_kebab_case() {
        assert_eq!(DataSource::SpotMetal.as_str(), "spot-metal");
        let json = serde_json::to_string(&DataSource::SpotMetal).unwrap();
        assert_eq!(json, "\"spot-metal\"");
    }
}
