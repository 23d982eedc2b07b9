use chrono::{DateTime, Utc};
use statrs::statistics::Statistics;

use crate::models::{AnomalyDetection, AnomalySeverity, AnomalyType};

const LOOKBACK_PERIODS: usize = 20;
const VOLATILITY_THRESHOLD: f64 = 2.0;
const VOLUME_THRESHOLD: f64 = 3.0;

struct Context<'a> {
    symbol: &'a str,
    market_type: &'a str,
}

/// Runs every detector over the supplied series and returns anomalies
/// ordered by severity (critical first), then by timestamp descending.
/// Optional inputs that are too short for their detector are silently
/// skipped rather than treated as an error.
#[allow(clippy::too_many_arguments)]
pub fn detect_anomalies(
    prices: &[f64],
    sentiments: Option<&[f64]>,
    volumes: Option<&[f64]>,
    timestamps: Option<&[DateTime<Utc>]>,
    symbol: &str,
    market_type: &str,
    support_level: Option<f64>,
    resistance_level: Option<f64>,
) -> Vec<AnomalyDetection> {
    if prices.len() < LOOKBACK_PERIODS {
        return Vec::new();
    }

    let ctx = Context { symbol, market_type };
    let mut anomalies = Vec::new();

    anomalies.extend(detect_price_anomalies(&ctx, prices, timestamps));

    if let Some(sentiments) = sentiments {
        if sentiments.len() >= prices.len() {
            anomalies.extend(detect_sentiment_divergence(&ctx, prices, sentiments, timestamps));
        }
    }

    if let Some(volumes) = volumes {
        if volumes.len() >= LOOKBACK_PERIODS {
            anomalies.extend(detect_volume_anomalies(&ctx, prices, volumes, timestamps));
        }
    }

    if support_level.is_some() || resistance_level.is_some() {
        anomalies.extend(detect_breakouts(&ctx, prices, support_level, resistance_level, timestamps));
    }

    anomalies.extend(detect_volatility_spikes(&ctx, prices, timestamps));

    anomalies.sort_by(|a, b| {
        severity_rank(a.severity)
            .cmp(&severity_rank(b.severity))
            .then_with(|| b.timestamp.cmp(&a.timestamp))
    });

    anomalies
}

fn severity_rank(severity: AnomalySeverity) -> u8 {
    match severity {
        AnomalySeverity::Critical => 0,
        AnomalySeverity::High => 1,
        AnomalySeverity::Medium => 2,
        AnomalySeverity::Low => 3,
    }
}

fn timestamp_at(timestamps: Option<&[DateTime<Utc>]>, index: usize) -> DateTime<Utc> {
    timestamps
        .and_then(|ts| ts.get(index))
        .copied()
        .unwrap_or_else(Utc::now)
}

fn period_returns(prices: &[f64]) -> Vec<f64> {
    (1..prices.len())
        .map(|i| (prices[i] - prices[i - 1]) / prices[i - 1] * 100.0)
        .collect()
}

fn detect_price_anomalies(
    ctx: &Context,
    prices: &[f64],
    timestamps: Option<&[DateTime<Utc>]>,
) -> Vec<AnomalyDetection> {
    let mut anomalies = Vec::new();
    let returns = period_returns(prices);

    if returns.len() < LOOKBACK_PERIODS {
        return anomalies;
    }

    for i in LOOKBACK_PERIODS..returns.len() {
        let recent = &returns[i - LOOKBACK_PERIODS..i];
        let mean_return = recent.iter().copied().mean();
        let std_return = recent.iter().copied().population_std_dev();

        if std_return == 0.0 {
            continue;
        }

        let current_return = returns[i];
        let z_score = (current_return - mean_return) / std_return;

        if z_score.abs() <= VOLATILITY_THRESHOLD {
            continue;
        }

        let severity = if z_score.abs() > 4.0 {
            AnomalySeverity::Critical
        } else if z_score.abs() > 3.0 {
            AnomalySeverity::High
        } else if z_score.abs() > 2.0 {
            AnomalySeverity::Medium
        } else {
            AnomalySeverity::Low
        };

        let (anomaly_type, description, recommendation) = if z_score > 0.0 {
            if current_return > 2.0 {
                (
                    AnomalyType::FlashPump,
                    format!("Flash pump detected: +{current_return:.2}% in single period"),
                    "Consider taking profits if long",
                )
            } else {
                (
                    AnomalyType::SuddenPriceMove,
                    format!("Sudden upward move: +{current_return:.2}%"),
                    "Monitor for continuation",
                )
            }
        } else if current_return < -2.0 {
            (
                AnomalyType::FlashCrash,
                format!("Flash crash detected: {current_return:.2}% in single period"),
                "Consider buying dip if support holds",
            )
        } else {
            (
                AnomalyType::SuddenPriceMove,
                format!("Sudden downward move: {current_return:.2}%"),
                "Monitor for breakdown",
            )
        };

        let price_index = (i + 1).min(prices.len() - 1);

        anomalies.push(AnomalyDetection {
            anomaly_type,
            severity,
            symbol: ctx.symbol.to_string(),
            market_type: ctx.market_type.to_string(),
            timestamp: timestamp_at(timestamps, i + 1),
            description,
            recommendation: Some(recommendation.to_string()),
            price_at_detection: prices[price_index],
            price_change_percent: current_return,
            sentiment_score: None,
            expected_sentiment: None,
            volume_ratio: None,
            z_score: Some(z_score),
        });
    }

    anomalies
}

fn detect_sentiment_divergence(
    ctx: &Context,
    prices: &[f64],
    sentiments: &[f64],
    timestamps: Option<&[DateTime<Utc>]>,
) -> Vec<AnomalyDetection> {
    let mut anomalies = Vec::new();
    let n = prices.len().min(sentiments.len());

    for i in 1..n {
        let price_change = (prices[i] - prices[i - 1]) / prices[i - 1] * 100.0;
        let sentiment_change = sentiments[i] - sentiments[i - 1];

        if price_change.abs() <= 0.3 {
            continue;
        }

        if price_change > 0.0 && sentiment_change < -0.1 {
            let severity = if price_change.abs() > 1.0 && sentiment_change < -0.2 {
                AnomalySeverity::High
            } else {
                AnomalySeverity::Medium
            };

            anomalies.push(AnomalyDetection {
                anomaly_type: AnomalyType::PriceSentimentDivergence,
                severity,
                symbol: ctx.symbol.to_string(),
                market_type: ctx.market_type.to_string(),
                timestamp: timestamp_at(timestamps, i),
                description: format!(
                    "Bearish divergence: Price +{price_change:.2}% but sentiment dropped {sentiment_change:.2}"
                ),
                recommendation: Some("Caution: Price rising on weak sentiment, potential reversal".to_string()),
                price_at_detection: prices[i],
                price_change_percent: price_change,
                sentiment_score: Some(sentiments[i]),
                expected_sentiment: Some(sentiments[i - 1] + price_change / 100.0),
                volume_ratio: None,
                z_score: None,
            });
        } else if price_change < 0.0 && sentiment_change > 0.1 {
            let severity = if price_change.abs() > 1.0 && sentiment_change > 0.2 {
                AnomalySeverity::High
            } else {
                AnomalySeverity::Medium
            };

            anomalies.push(AnomalyDetection {
                anomaly_type: AnomalyType::PriceSentimentDivergence,
                severity,
                symbol: ctx.symbol.to_string(),
                market_type: ctx.market_type.to_string(),
                timestamp: timestamp_at(timestamps, i),
                description: format!(
                    "Bullish divergence: Price {price_change:.2}% but sentiment rose +{sentiment_change:.2}"
                ),
                recommendation: Some("Opportunity: Price falling on improving sentiment, potential bottom".to_string()),
                price_at_detection: prices[i],
                price_change_percent: price_change,
                sentiment_score: Some(sentiments[i]),
                expected_sentiment: Some(sentiments[i - 1] - price_change.abs() / 100.0),
                volume_ratio: None,
                z_score: None,
            });
        }
    }

    anomalies
}

fn detect_volume_anomalies(
    ctx: &Context,
    prices: &[f64],
    volumes: &[f64],
    timestamps: Option<&[DateTime<Utc>]>,
) -> Vec<AnomalyDetection> {
    let mut anomalies = Vec::new();
    let n = volumes.len().min(prices.len());

    for i in LOOKBACK_PERIODS..n {
        let trailing = &volumes[i - LOOKBACK_PERIODS..i];
        let trailing_mean = trailing.iter().sum::<f64>() / trailing.len() as f64;
        if trailing_mean == 0.0 {
            continue;
        }

        let ratio = volumes[i] / trailing_mean;
        if ratio < VOLUME_THRESHOLD {
            continue;
        }

        let severity = if ratio >= 5.0 { AnomalySeverity::High } else { AnomalySeverity::Medium };
        let price_change = (prices[i] - prices[i - 1]) / prices[i - 1] * 100.0;

        anomalies.push(AnomalyDetection {
            anomaly_type: AnomalyType::VolumeSpike,
            severity,
            symbol: ctx.symbol.to_string(),
            market_type: ctx.market_type.to_string(),
            timestamp: timestamp_at(timestamps, i),
            description: format!("Volume spike: {ratio:.1}x trailing average"),
            recommendation: Some("Confirm move with price action before acting".to_string()),
            price_at_detection: prices[i],
            price_change_percent: price_change,
            sentiment_score: None,
            expected_sentiment: None,
            volume_ratio: Some(ratio),
            z_score: None,
        });
    }

    anomalies
}

fn detect_breakouts(
    ctx: &Context,
    prices: &[f64],
    support_level: Option<f64>,
    resistance_level: Option<f64>,
    timestamps: Option<&[DateTime<Utc>]>,
) -> Vec<AnomalyDetection> {
    let mut anomalies = Vec::new();
    let Some(&last) = prices.last() else {
        return anomalies;
    };
    let prev = if prices.len() >= 2 { prices[prices.len() - 2] } else { last };
    let price_change = if prev != 0.0 { (last - prev) / prev * 100.0 } else { 0.0 };
    let last_index = prices.len() - 1;

    if let Some(support) = support_level {
        let breach_percent = (support - last) / support * 100.0;
        if last < support && breach_percent > 0.3 {
            let severity = if breach_percent > 1.0 { AnomalySeverity::High } else { AnomalySeverity::Medium };
            anomalies.push(AnomalyDetection {
                anomaly_type: AnomalyType::SupportBreak,
                severity,
                symbol: ctx.symbol.to_string(),
                market_type: ctx.market_type.to_string(),
                timestamp: timestamp_at(timestamps, last_index),
                description: format!("Support level {support:.2} broken by {breach_percent:.2}%"),
                recommendation: Some("Watch for further downside confirmation".to_string()),
                price_at_detection: last,
                price_change_percent: price_change,
                sentiment_score: None,
                expected_sentiment: None,
                volume_ratio: None,
                z_score: None,
            });
        }
    }

    if let Some(resistance) = resistance_level {
        let breach_percent = (last - resistance) / resistance * 100.0;
        if last > resistance && breach_percent > 0.3 {
            let severity = if breach_percent > 1.0 { AnomalySeverity::High } else { AnomalySeverity::Medium };
            anomalies.push(AnomalyDetection {
                anomaly_type: AnomalyType::ResistanceBreak,
                severity,
                symbol: ctx.symbol.to_string(),
                market_type: ctx.market_type.to_string(),
                timestamp: timestamp_at(timestamps, last_index),
                description: format!("Resistance level {resistance:.2} broken by {breach_percent:.2}%"),
                recommendation: Some("Watch for further upside confirmation".to_string()),
                price_at_detection: last,
                price_change_percent: price_change,
                sentiment_score: None,
                expected_sentiment: None,
                volume_ratio: None,
                z_score: None,
            });
        }
    }

    anomalies
}

fn detect_volatility_spikes(
    ctx: &Context,
    prices: &[f64],
    timestamps: Option<&[DateTime<Utc>]>,
) -> Vec<AnomalyDetection> {
    let mut anomalies = Vec::new();
    let returns = period_returns(prices);
    if returns.len() < LOOKBACK_PERIODS * 2 {
        return anomalies;
    }

    let mut rolling_std = Vec::with_capacity(returns.len() - LOOKBACK_PERIODS);
    for i in LOOKBACK_PERIODS..returns.len() {
        let window = &returns[i - LOOKBACK_PERIODS..i];
        rolling_std.push(window.iter().copied().population_std_dev());
    }

    for i in LOOKBACK_PERIODS..rolling_std.len() {
        let history = &rolling_std[i - LOOKBACK_PERIODS..i];
        let median = median_of(history);
        if median == 0.0 {
            continue;
        }

        let current_std = rolling_std[i];
        let ratio = current_std / median;
        if ratio < 2.0 {
            continue;
        }

        let severity = if ratio >= 4.0 { AnomalySeverity::High } else { AnomalySeverity::Medium };
        let price_index = (i + LOOKBACK_PERIODS + 1).min(prices.len() - 1);
        let price_change = returns.get(i + LOOKBACK_PERIODS).copied().unwrap_or(0.0);

        anomalies.push(AnomalyDetection {
            anomaly_type: AnomalyType::VolatilitySpike,
            severity,
            symbol: ctx.symbol.to_string(),
            market_type: ctx.market_type.to_string(),
            timestamp: timestamp_at(timestamps, price_index),
            description: format!("Volatility spike: rolling std {ratio:.1}x its recent median"),
            recommendation: Some("Widen stops or reduce size until volatility normalizes".to_string()),
            price_at_detection: prices[price_index],
            price_change_percent: price_change,
            sentiment_score: None,
            expected_sentiment: None,
            volume_ratio: None,
            z_score: None,
        });
    }

    anomalies
}

fn median_of(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_series_yields_no_anomalies() {
        let prices = vec![100.0; 10];
        let anomalies = detect_anomalies(&prices, None, None, None, "BTC", "crypto", None, None);
        assert!(anomalies.is_empty());
    }

    #[test]
    fn severity_ordering_is_non_increasing() {
        let mut prices: Vec<f64> = vec![100.0; 25];
        prices.push(200.0); // huge spike
        prices.push(102.0);
        prices.push(50.0); // huge crash

        let anomalies = detect_anomalies(&prices, None, None, None, "BTC", "crypto", None, None);
        let ranks: Vec<u8> = anomalies.iter().map(|a| severity_rank(a.severity)).collect();
        for pair in ranks.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn price_sentiment_divergence_flags_bearish_case() {
        let prices = vec![100.0, 100.0, 102.0];
        let sentiments = vec![0.4, 0.4, 0.15];
        let anomalies = detect_sentiment_divergence(
            &Context { symbol: "BTC", market_type: "crypto" },
            &prices,
            &sentiments,
            None,
        );
        assert!(!anomalies.is_empty());
        let found = &anomalies[0];
        assert_eq!(found.anomaly_type, AnomalyType::PriceSentimentDivergence);
        assert!(found.severity >= AnomalySeverity::Medium);
        assert!((found.price_change_percent - 2.0).abs() < 0.1);
    }

    #[test]
    fn volume_spike_above_five_x_is_high_severity() {
        let prices: Vec<f64> = (0..25).map(|i| 100.0 + i as f64).collect();
        let mut volumes = vec![1000.0; 24];
        volumes.push(6000.0);
        let anomalies = detect_volume_anomalies(
            &Context { symbol: "BTC", market_type: "crypto" },
            &prices,
            &volumes,
            None,
        );
        assert!(anomalies.iter().any(|a| a.severity == AnomalySeverity::High));
    }
}
