use std::collections::BTreeMap;

use crate::errors::ValidationError;
use crate::models::{
    CorrelationResult, CorrelationStrength, GrangerCausalityResult, LagAnalysis, LeadLagSide,
    RollingCorrelationPoint,
};

const MIN_SAMPLE_SIZE: usize = 30;
const ROLLING_WINDOW: usize = 10;
const MAX_LAG: i32 = 5;

/// Pearson correlation coefficient by the textbook formula. Returns 0.0
/// when the denominator vanishes (a constant series has no correlation).
pub fn pearson_correlation(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len();
    if n != y.len() || n == 0 {
        return 0.0;
    }

    let mean_x = x.iter().sum::<f64>() / n as f64;
    let mean_y = y.iter().sum::<f64>() / n as f64;

    let numerator: f64 = (0..n).map(|i| (x[i] - mean_x) * (y[i] - mean_y)).sum();
    let sum_sq_x: f64 = x.iter().map(|xi| (xi - mean_x).powi(2)).sum();
    let sum_sq_y: f64 = y.iter().map(|yi| (yi - mean_y).powi(2)).sum();

    let denominator = (sum_sq_x * sum_sq_y).sqrt();
    if denominator == 0.0 {
        return 0.0;
    }

    numerator / denominator
}

fn classify_correlation_strength(correlation: f64) -> CorrelationStrength {
    let abs_corr = correlation.abs();
    let positive = correlation > 0.0;

    if abs_corr >= 0.8 {
        if positive {
            CorrelationStrength::VeryStrongPositive
        } else {
            CorrelationStrength::VeryStrongNegative
        }
    } else if abs_corr >= 0.6 {
        if positive {
            CorrelationStrength::StrongPositive
        } else {
            CorrelationStrength::StrongNegative
        }
    } else if abs_corr >= 0.4 {
        if positive {
            CorrelationStrength::ModeratePositive
        } else {
            CorrelationStrength::ModerateNegative
        }
    } else {
        CorrelationStrength::Weak
    }
}

fn calculate_rolling_correlation(x: &[f64], y: &[f64], window: usize) -> Vec<RollingCorrelationPoint> {
    let mut rolling = Vec::new();
    if x.len() <= window {
        return rolling;
    }

    for i in window..x.len() {
        let corr = pearson_correlation(&x[i - window..i], &y[i - window..i]);
        rolling.push(RollingCorrelationPoint {
            index: i,
            correlation: round3(corr),
        });
    }

    rolling
}

fn analyze_lead_lag(x: &[f64], y: &[f64], max_lag: i32) -> LagAnalysis {
    let mut best_lag = 0i32;
    let mut best_correlation = 0.0f64;
    let mut all_correlations = BTreeMap::new();

    for lag in -max_lag..=max_lag {
        let corr = if lag == 0 {
            pearson_correlation(x, y)
        } else if lag > 0 {
            let k = lag as usize;
            if k >= x.len() {
                0.0
            } else {
                pearson_correlation(&x[k..], &y[..y.len() - k])
            }
        } else {
            let k = (-lag) as usize;
            if k >= x.len() {
                0.0
            } else {
                pearson_correlation(&x[..x.len() - k], &y[k..])
            }
        };

        all_correlations.insert(lag, round3(corr));

        if corr.abs() > best_correlation.abs() {
            best_correlation = corr;
            best_lag = lag;
        }
    }

    let (leader, lagger) = match best_lag.cmp(&0) {
        std::cmp::Ordering::Greater => (LeadLagSide::Secondary, LeadLagSide::Primary),
        std::cmp::Ordering::Less => (LeadLagSide::Primary, LeadLagSide::Secondary),
        std::cmp::Ordering::Equal => (LeadLagSide::None, LeadLagSide::None),
    };

    LagAnalysis {
        optimal_lag: best_lag,
        optimal_correlation: round3(best_correlation),
        leader,
        lagger,
        all_correlations,
    }
}

fn generate_interpretation(
    primary: &str,
    secondary: &str,
    correlation: f64,
    lag_analysis: &Option<LagAnalysis>,
) -> String {
    let mut parts = Vec::new();

    if correlation.abs() > 0.7 {
        parts.push(format!(
            "Strong {} correlation",
            if correlation > 0.0 { "positive" } else { "negative" }
        ));
    } else if correlation.abs() > 0.4 {
        parts.push(format!(
            "Moderate {} correlation",
            if correlation > 0.0 { "positive" } else { "negative" }
        ));
    } else {
        parts.push("Weak correlation".to_string());
    }

    parts.push(format!("({correlation:.2}) between {primary} and {secondary}"));

    if let Some(lag) = lag_analysis {
        if lag.optimal_lag != 0 {
            if matches!(lag.leader, LeadLagSide::Secondary) {
                parts.push(format!("{secondary} leads {primary} by {} periods", lag.optimal_lag.abs()));
            } else {
                parts.push(format!("{primary} leads {secondary} by {} periods", lag.optimal_lag.abs()));
            }
        }
    }

    parts.join(" ")
}

fn insufficient_data_result(primary: &str, secondary: &str, period_days: u32) -> CorrelationResult {
    CorrelationResult {
        primary_symbol: primary.to_string(),
        secondary_symbol: secondary.to_string(),
        correlation: 0.0,
        correlation_strength: CorrelationStrength::Weak,
        sample_size: 0,
        period_days,
        rolling_correlations: None,
        lag_analysis: None,
        interpretation: format!("Insufficient data to calculate correlation between {primary} and {secondary}"),
    }
}

/// Computes Pearson correlation, rolling correlation, and a lead/lag
/// analysis between two aligned price series. Returns an insufficient-data
/// sentinel (not an error) when the series are shorter than 30 samples.
pub fn calculate_correlation(
    primary_prices: &[f64],
    secondary_prices: &[f64],
    primary_symbol: &str,
    secondary_symbol: &str,
    period_days: u32,
    calculate_lag: bool,
) -> Result<CorrelationResult, ValidationError> {
    if primary_prices.len() != secondary_prices.len() {
        return Err(ValidationError {
            field: "secondary_prices".to_string(),
            reason: "price series must have the same length".to_string(),
        });
    }

    if primary_prices.len() < MIN_SAMPLE_SIZE {
        return Ok(insufficient_data_result(primary_symbol, secondary_symbol, period_days));
    }

    let correlation = pearson_correlation(primary_prices, secondary_prices);
    let strength = classify_correlation_strength(correlation);
    let rolling = calculate_rolling_correlation(primary_prices, secondary_prices, ROLLING_WINDOW);
    let lag_analysis = if calculate_lag {
        Some(analyze_lead_lag(primary_prices, secondary_prices, MAX_LAG))
    } else {
        None
    };
    let interpretation = generate_interpretation(primary_symbol, secondary_symbol, correlation, &lag_analysis);

    Ok(CorrelationResult {
        primary_symbol: primary_symbol.to_string(),
        secondary_symbol: secondary_symbol.to_string(),
        correlation,
        correlation_strength: strength,
        sample_size: primary_prices.len(),
        period_days,
        rolling_correlations: Some(rolling),
        lag_analysis,
        interpretation,
    })
}

fn simple_f_test(dependent: &[f64], independent: &[f64]) -> (f64, f64) {
    let n = dependent.len();
    if n < 3 || independent.len() != n {
        return (0.0, 1.0);
    }

    let mean_dep = dependent.iter().sum::<f64>() / n as f64;
    let mean_ind = independent.iter().sum::<f64>() / n as f64;

    let numerator: f64 = (0..n).map(|i| (independent[i] - mean_ind) * (dependent[i] - mean_dep)).sum();
    let denominator: f64 = independent.iter().map(|v| (v - mean_ind).powi(2)).sum();

    if denominator == 0.0 {
        return (0.0, 1.0);
    }

    let slope = numerator / denominator;
    let intercept = mean_dep - slope * mean_ind;

    let predicted: Vec<f64> = independent.iter().map(|v| intercept + slope * v).collect();

    let ss_res: f64 = (0..n).map(|i| (dependent[i] - predicted[i]).powi(2)).sum();
    let ss_tot: f64 = dependent.iter().map(|v| (v - mean_dep).powi(2)).sum();

    if ss_res == 0.0 {
        return (999.0, 0.001);
    }

    let ms_reg = ss_tot - ss_res;
    let ms_res = ss_res / (n as f64 - 2.0);

    if ms_res == 0.0 {
        return (999.0, 0.001);
    }

    let f_stat = ms_reg / ms_res;
    let p_value = if f_stat > 10.0 {
        0.001
    } else if f_stat > 5.0 {
        0.01
    } else if f_stat > 2.0 {
        0.05
    } else {
        0.2
    };

    (f_stat, p_value)
}

/// Tests whether sentiment Granger-causes price movements via a banded
/// single-variable F-test across candidate lags.
pub fn analyze_sentiment_price_causality(
    prices: &[f64],
    sentiments: &[f64],
    symbol: &str,
    max_lag_hours: u32,
) -> Result<GrangerCausalityResult, ValidationError> {
    if prices.len() != sentiments.len() {
        return Err(ValidationError {
            field: "sentiments".to_string(),
            reason: "price and sentiment series must have the same length".to_string(),
        });
    }

    let effect_variable = format!("{symbol}_price");

    if prices.len() < MIN_SAMPLE_SIZE {
        return Ok(GrangerCausalityResult {
            cause_variable: "sentiment".to_string(),
            effect_variable,
            lag_hours: 0,
            f_statistic: 0.0,
            p_value: 1.0,
            is_causal: false,
            interpretation: "Insufficient data for causality test".to_string(),
        });
    }

    let price_changes: Vec<f64> = (1..prices.len())
        .map(|i| (prices[i] - prices[i - 1]) / prices[i - 1] * 100.0)
        .collect();

    let mut best_lag = 0u32;
    let mut best_f_stat = 0.0f64;
    let mut best_p_value = 1.0f64;

    let max_lag = (max_lag_hours + 1).min((price_changes.len() / 4) as u32);
    for lag in 1..max_lag {
        let lag_usize = lag as usize;
        if lag_usize >= sentiments.len() {
            break;
        }

        let (f_stat, p_value) = simple_f_test(&price_changes[lag_usize..], &sentiments[..sentiments.len() - lag_usize]);

        if p_value < best_p_value && f_stat > best_f_stat {
            best_p_value = p_value;
            best_f_stat = f_stat;
            best_lag = lag;
        }
    }

    let is_causal = best_p_value < 0.05 && best_f_stat > 2.0;

    let interpretation = if is_causal {
        format!(
            "Sentiment Granger-causes {symbol} price movements with a {best_lag} hour lag. \
             Sentiment changes precede price changes, suggesting predictive value for trading strategies."
        )
    } else {
        format!(
            "No significant Granger causality detected between sentiment and {symbol} price at any lag up to {max_lag_hours} hours. \
             Price movements may be driven by other factors."
        )
    };

    Ok(GrangerCausalityResult {
        cause_variable: "sentiment".to_string(),
        effect_variable,
        lag_hours: best_lag,
        f_statistic: best_f_stat,
        p_value: best_p_value,
        is_causal,
        interpretation,
    })
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}
