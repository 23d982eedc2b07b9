use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;

const BASE_DELAY_SECONDS: u64 = 1;
const MAX_DELAY_SECONDS: u64 = 60;
const MAX_RETRIES: u32 = 5;

/// Per-symbol retry state. Each symbol backs off independently so one
/// misbehaving ticker doesn't throttle the rest of a batch collection tick.
#[derive(Debug, Clone, Copy, Default)]
struct RetryState {
    retries: u32,
}

pub struct BackoffTracker {
    state: Mutex<HashMap<String, RetryState>>,
}

impl BackoffTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Computes `min(base * 2^retries, max) + jitter` where jitter is up to
    /// 10% of the computed delay, then increments the retry counter.
    pub async fn next_delay(&self, symbol: &str) -> Duration {
        let mut guard = self.state.lock().await;
        let entry = guard.entry(symbol.to_string()).or_default();

        let retries = entry.retries.min(MAX_RETRIES);
        let exp = BASE_DELAY_SECONDS.saturating_mul(1u64 << (retries + 1));
        let base = exp.min(MAX_DELAY_SECONDS);

        let jitter_max = (base as f64 * 0.10).max(0.0);
        let jitter = rand::rng().random_range(0.0..=jitter_max);

        entry.retries = (entry.retries + 1).min(MAX_RETRIES);

        Duration::from_secs_f64(base as f64 + jitter)
    }

    pub async fn reset(&self, symbol: &str) {
        let mut guard = self.state.lock().await;
        guard.remove(symbol);
    }

    pub async fn retries(&self, symbol: &str) -> u32 {
        let guard = self.state.lock().await;
        guard.get(symbol).map(|s| s.retries).unwrap_or(0)
    }
}

impl Default for BackoffTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delay_grows_exponentially_and_caps() {
        let tracker = BackoffTracker::new();
        let mut last = Duration::ZERO;
        for _ in 0..8 {
            let delay = tracker.next_delay("BTC").await;
            assert!(delay.as_secs_f64() >= last.as_secs_f64() * 0.5);
            last = delay;
        }
        let capped = tracker.next_delay("BTC").await;
        assert!(capped.as_secs_f64() <= MAX_DELAY_SECONDS as f64 * 1.10 + 0.01);
    }

    #[tokio::test]
    async fn symbols_back_off_independently() {
        let tracker = BackoffTracker::new();
        tracker.next_delay("BTC").await;
        tracker.next_delay("BTC").await;
        assert_eq!(tracker.retries("BTC").await, 2);
        assert_eq!(tracker.retries("ETH").await, 0);
    }

    #[tokio::test]
    async fn reset_clears_retry_count() {
        let tracker = BackoffTracker::new();
        tracker.next_delay("BTC").await;
        tracker.reset("BTC").await;
        assert_eq!(tracker.retries("BTC").await, 0);
    }

    #[tokio::test]
    async fn retry_count_does_not_exceed_ceiling() {
        let tracker = BackoffTracker::new();
        for _ in 0..20 {
            tracker.next_delay("BTC").await;
        }
        assert_eq!(tracker.retries("BTC").await, MAX_RETRIES);
    }
}
