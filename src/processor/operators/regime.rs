use crate::models::{MarketRegime, RegimeAnalysis, TrendDirection, VolatilityRegime};

const MIN_SAMPLE_SIZE: usize = 50;
const RSI_PERIOD: usize = 14;
const SMA_SHORT: usize = 50;
const SMA_LONG: usize = 200;
const EMA_PERIOD: usize = 20;
const VOLATILITY_LOOKBACK: usize = 14;
const PIVOT_WINDOW: usize = 30;

fn simple_moving_average(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period {
        return None;
    }
    let window = &prices[prices.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

fn exponential_moving_average(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period {
        return None;
    }
    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed = prices[prices.len() - period..]
        .iter()
        .take(1)
        .next()
        .copied()
        .unwrap_or(prices[0]);
    let mut ema = seed;
    for &price in &prices[prices.len() - period + 1..] {
        ema = (price - ema) * multiplier + ema;
    }
    Some(ema)
}

/// Wilder's RSI(14). A flat input (no up or down movement in the lookback)
/// has no well-defined ratio and is reported as the neutral midpoint, 50.0,
/// rather than propagating a division-by-zero.
fn relative_strength_index(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period + 1 {
        return None;
    }

    let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let recent = &deltas[deltas.len() - period..];

    let gains: f64 = recent.iter().filter(|d| **d > 0.0).sum();
    let losses: f64 = recent.iter().filter(|d| **d < 0.0).map(|d| d.abs()).sum();

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;

    if avg_gain == 0.0 && avg_loss == 0.0 {
        return Some(50.0);
    }
    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

fn volatility_regime(prices: &[f64], last_price: f64) -> (VolatilityRegime, f64) {
    if prices.len() < VOLATILITY_LOOKBACK + 1 || last_price == 0.0 {
        return (VolatilityRegime::Low, 0.0);
    }

    let window = &prices[prices.len() - VOLATILITY_LOOKBACK - 1..];
    let abs_changes: Vec<f64> = window.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    let avg_abs_change = abs_changes.iter().sum::<f64>() / abs_changes.len() as f64;
    let pct_of_price = avg_abs_change / last_price * 100.0;

    let regime = if pct_of_price >= 3.0 {
        VolatilityRegime::Extreme
    } else if pct_of_price >= 1.5 {
        VolatilityRegime::High
    } else if pct_of_price >= 0.5 {
        VolatilityRegime::Medium
    } else {
        VolatilityRegime::Low
    };

    (regime, pct_of_price)
}

struct PivotPoints {
    pivot: f64,
    support_1: f64,
    resistance_1: f64,
}

fn classical_pivots(prices: &[f64]) -> Option<PivotPoints> {
    if prices.is_empty() {
        return None;
    }
    let window = &prices[prices.len().saturating_sub(PIVOT_WINDOW)..];
    let high = window.iter().cloned().fold(f64::MIN, f64::max);
    let low = window.iter().cloned().fold(f64::MAX, f64::min);
    let close = *window.last()?;

    let pivot = (high + low + close) / 3.0;
    Some(PivotPoints {
        pivot,
        support_1: 2.0 * pivot - high,
        resistance_1: 2.0 * pivot - low,
    })
}

/// Classifies a symbol's current market regime from its price history.
/// Requires at least 50 samples; shorter series return a neutral sentinel
/// with zero confidence rather than an error.
pub fn detect_regime(prices: &[f64], symbol: &str, market_type: &str) -> RegimeAnalysis {
    if prices.len() < MIN_SAMPLE_SIZE {
        return RegimeAnalysis {
            symbol: symbol.to_string(),
            market_type: market_type.to_string(),
            regime: MarketRegime::Neutral,
            trend_direction: TrendDirection::Sideways,
            trend_strength: 0.0,
            volatility_regime: VolatilityRegime::Low,
            confidence: 0.0,
            rsi_14: None,
            sma_50: None,
            sma_200: None,
            ema_20: None,
            support_level: None,
            resistance_level: None,
            sample_size: prices.len(),
        };
    }

    let last_price = *prices.last().unwrap();
    let rsi_14 = relative_strength_index(prices, RSI_PERIOD);
    let sma_50 = simple_moving_average(prices, SMA_SHORT);
    let sma_200 = simple_moving_average(prices, SMA_LONG);
    let ema_20 = exponential_moving_average(prices, EMA_PERIOD);
    let sma_20 = simple_moving_average(prices, EMA_PERIOD);
    let (vol_regime, _vol_pct) = volatility_regime(prices, last_price);
    let pivots = classical_pivots(prices);

    let (trend_direction, trend_strength) = match (sma_20, sma_50) {
        (Some(sma_20), Some(sma_50)) if sma_50 != 0.0 => {
            let gap = (sma_20 - sma_50) / sma_50;
            if gap.abs() <= 0.005 {
                (TrendDirection::Sideways, gap.abs().min(1.0))
            } else if gap > 0.0 {
                (TrendDirection::Up, gap.abs().min(1.0))
            } else {
                (TrendDirection::Down, gap.abs().min(1.0))
            }
        }
        _ => (TrendDirection::Sideways, 0.0),
    };

    let bull_condition = matches!((sma_50, sma_200, rsi_14), (Some(s50), Some(s200), Some(rsi))
        if s50 > s200 && rsi > 40.0 && rsi < 75.0 && last_price > s50);
    let bear_condition = matches!((sma_50, sma_200, rsi_14), (Some(s50), Some(s200), Some(rsi))
        if s50 < s200 && rsi > 25.0 && rsi < 60.0 && last_price < s50);

    let regime = if bull_condition {
        MarketRegime::Bull
    } else if bear_condition {
        MarketRegime::Bear
    } else if vol_regime == VolatilityRegime::Extreme {
        MarketRegime::Volatile
    } else {
        MarketRegime::Neutral
    };

    let rsi_in_range_score = match (regime, rsi_14) {
        (MarketRegime::Bull, Some(rsi)) if rsi > 40.0 && rsi < 75.0 => 1.0,
        (MarketRegime::Bear, Some(rsi)) if rsi > 25.0 && rsi < 60.0 => 1.0,
        (_, Some(_)) => 0.4,
        (_, None) => 0.0,
    };

    let agreement_score = match regime {
        MarketRegime::Bull | MarketRegime::Bear => 1.0,
        MarketRegime::Volatile => 0.6,
        MarketRegime::Neutral => 0.2,
    };

    let confidence = (rsi_in_range_score * 0.3 + trend_strength.min(1.0) * 0.3 + agreement_score * 0.4).clamp(0.0, 1.0);

    RegimeAnalysis {
        symbol: symbol.to_string(),
        market_type: market_type.to_string(),
        regime,
        trend_direction,
        trend_strength: trend_strength.min(1.0),
        volatility_regime: vol_regime,
        confidence,
        rsi_14,
        sma_50,
        sma_200,
        ema_20,
        support_level: pivots.as_ref().map(|p| p.support_1),
        resistance_level: pivots.as_ref().map(|p| p.resistance_1),
        sample_size: prices.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_series_returns_neutral_sentinel() {
        let prices = vec![100.0; 10];
        let analysis = detect_regime(&prices, "BTC", "crypto");
        assert_eq!(analysis.regime, MarketRegime::Neutral);
        assert_eq!(analysis.confidence, 0.0);
        assert_eq!(analysis.sample_size, 10);
    }

    #[test]
    fn flat_series_is_neutral_with_low_volatility_and_low_confidence() {
        let prices = vec![2000.0; 200];
        let analysis = detect_regime(&prices, "BTC", "crypto");
        assert_eq!(analysis.regime, MarketRegime::Neutral);
        assert_eq!(analysis.volatility_regime, VolatilityRegime::Low);
        assert!(analysis.confidence <= 0.3);
        assert_eq!(analysis.sma_50, analysis.sma_200);
        assert_eq!(analysis.rsi_14, Some(50.0));
    }

    #[test]
    fn detection_is_deterministic() {
        let prices: Vec<f64> = (0..200).map(|i| 100.0 + (i as f64 * 0.1).sin() * 5.0 + i as f64 * 0.05).collect();
        let first = detect_regime(&prices, "BTC", "crypto");
        let second = detect_regime(&prices, "BTC", "crypto");
        assert_eq!(first.regime, second.regime);
        assert_eq!(first.confidence, second.confidence);
    }

    #[test]
    fn rising_trend_classifies_as_up() {
        let prices: Vec<f64> = (0..200).map(|i| 100.0 + i as f64 * 0.5).collect();
        let analysis = detect_regime(&prices, "BTC", "crypto");
        assert_eq!(analysis.trend_direction, TrendDirection::Up);
    }
}
