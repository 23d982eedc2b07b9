use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::models::ProcessedSentiment;

#[derive(Debug, Clone, Copy)]
struct Sample {
    score: f64,
    at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowSnapshot {
    pub window_label: &'static str,
    pub sample_count: usize,
    pub mean_score: f64,
}

const WINDOWS: &[(&str, i64)] = &[
    ("5m", 5),
    ("15m", 15),
    ("1h", 60),
    ("24h", 60 * 24),
];

/// Rolling per-symbol sentiment windows. Append and snapshot are the only
/// operations, neither of which suspends, so a lightweight mutex is
/// sufficient rather than an async lock.
pub struct SentimentAggregator {
    symbols: Mutex<BTreeMap<String, VecDeque<Sample>>>,
}

impl SentimentAggregator {
    pub fn new() -> Self {
        Self {
            symbols: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn record(&self, processed: &ProcessedSentiment) {
        let mut symbols = self.symbols.lock();
        let deque = symbols.entry(processed.symbol.clone()).or_default();
        deque.push_back(Sample {
            score: processed.sentiment.score,
            at: processed.timestamp,
        });

        let cutoff = Utc::now() - ChronoDuration::minutes(24 * 60);
        while deque.front().map(|s| s.at < cutoff).unwrap_or(false) {
            deque.pop_front();
        }
    }

    pub fn snapshot(&self, symbol: &str) -> Vec<WindowSnapshot> {
        let symbols = self.symbols.lock();
        let Some(deque) = symbols.get(symbol) else {
            return WINDOWS
                .iter()
                .map(|(label, _)| WindowSnapshot {
                    window_label: label,
                    sample_count: 0,
                    mean_score: 0.0,
                })
                .collect();
        };

        let now = Utc::now();
        WINDOWS
            .iter()
            .map(|(label, minutes)| {
                let cutoff = now - ChronoDuration::minutes(*minutes);
                let in_window: Vec<f64> = deque.iter().filter(|s| s.at >= cutoff).map(|s| s.score).collect();
                let mean = if in_window.is_empty() {
                    0.0
                } else {
                    in_window.iter().sum::<f64>() / in_window.len() as f64
                };
                WindowSnapshot {
                    window_label: label,
                    sample_count: in_window.len(),
                    mean_score: mean,
                }
            })
            .collect()
    }
}

impl Default for SentimentAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Sentiment, SentimentLabel};
    use uuid::Uuid;

    fn sample(symbol: &str, score: f64, at: DateTime<Utc>) -> ProcessedSentiment {
        ProcessedSentiment {
            event_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            market_type: "crypto".to_string(),
            sentiment: Sentiment {
                score,
                label: SentimentLabel::Neutral,
                confidence: 0.8,
            },
            timestamp: at,
            source: "test".to_string(),
        }
    }

    #[test]
    fn unseen_symbol_snapshot_is_all_empty_windows() {
        let agg = SentimentAggregator::new();
        let snapshot = agg.snapshot("BTC");
        assert_eq!(snapshot.len(), 4);
        assert!(snapshot.iter().all(|w| w.sample_count == 0));
    }

    #[test]
    fn recorded_samples_appear_in_every_window_that_covers_them() {
        let agg = SentimentAggregator::new();
        agg.record(&sample("BTC", 0.5, Utc::now()));
        agg.record(&sample("BTC", 0.3, Utc::now()));

        let snapshot = agg.snapshot("BTC");
        for window in &snapshot {
            assert_eq!(window.sample_count, 2);
        }
    }

    #[test]
    fn samples_outside_window_are_excluded() {
        let agg = SentimentAggregator::new();
        agg.record(&sample("BTC", 0.5, Utc::now() - ChronoDuration::hours(2)));

        let snapshot = agg.snapshot("BTC");
        let five_min = snapshot.iter().find(|w| w.window_label == "5m").unwrap();
        assert_eq!(five_min.sample_count, 0);

        let one_day = snapshot.iter().find(|w| w.window_label == "24h").unwrap();
        assert_eq!(one_day.sample_count, 1);
    }
}
