use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::models::CircuitBreakerState as WireCircuitBreakerState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    failure_count: usize,
    lifetime_failures: u64,
    last_failure_time: Option<Instant>,
    last_failure_utc: Option<chrono::DateTime<chrono::Utc>>,
}

/// Per-collector breaker. Unlike a textbook three-state breaker, success
/// while closed decays the failure counter by one instead of resetting it,
/// and the HalfOpen state resolves on a single probe tick rather than a
/// success-count threshold.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: usize,
    reset_timeout: Duration,
    inner: Arc<RwLock<Inner>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: usize, reset_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            reset_timeout,
            inner: Arc::new(RwLock::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                lifetime_failures: 0,
                last_failure_time: None,
                last_failure_utc: None,
            })),
        }
    }

    /// Returns true if the tick may proceed (closed, or a probe tick while
    /// half-open/past-reset-window). Returns false if the tick must be
    /// skipped with `CircuitBreakerOpen`.
    pub async fn allow_tick(&self) -> bool {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open | CircuitState::HalfOpen => {
                if let Some(last_failure) = inner.last_failure_time {
                    if last_failure.elapsed() > self.reset_timeout {
                        info!(
                            breaker = %self.name,
                            "breaker reset window elapsed, treating next tick as probe"
                        );
                        inner.state = CircuitState::HalfOpen;
                        true
                    } else {
                        false
                    }
                } else {
                    true
                }
            }
        }
    }

    pub async fn on_success(&self) {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::HalfOpen => {
                info!(breaker = %self.name, "probe succeeded, breaker closed");
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
            }
            CircuitState::Closed => {
                if inner.failure_count > 0 {
                    inner.failure_count -= 1;
                }
            }
            CircuitState::Open => {
                warn!(breaker = %self.name, "success recorded while open, unexpected");
            }
        }
    }

    pub async fn on_failure(&self) {
        let mut inner = self.inner.write().await;
        inner.failure_count += 1;
        inner.lifetime_failures += 1;
        inner.last_failure_time = Some(Instant::now());
        inner.last_failure_utc = Some(chrono::Utc::now());

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.failure_threshold {
                    error!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        "breaker opened"
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "probe failed, breaker re-opened");
                inner.state = CircuitState::Open;
            }
            CircuitState::Open => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    pub async fn snapshot(&self) -> WireCircuitBreakerState {
        let inner = self.inner.read().await;
        WireCircuitBreakerState {
            failure_count: inner.failure_count,
            last_failure_time: inner.last_failure_utc,
            is_open: inner.state != CircuitState::Closed,
            threshold: self.failure_threshold,
            reset_timeout_seconds: self.reset_timeout.as_secs(),
        }
    }

    pub async fn lifetime_failures(&self) -> u64 {
        self.inner.read().await.lifetime_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let cb = CircuitBreaker::new("test", 5, Duration::from_secs(300));
        for _ in 0..5 {
            assert!(cb.allow_tick().await);
            cb.on_failure().await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.allow_tick().await);
    }

    #[tokio::test]
    async fn probe_success_fully_resets() {
        let cb = CircuitBreaker::new("test", 2, Duration::from_millis(50));
        cb.on_failure().await;
        cb.on_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cb.allow_tick().await);
        cb.on_success().await;

        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn success_decays_failure_count_by_one() {
        let cb = CircuitBreaker::new("test", 5, Duration::from_secs(300));
        cb.on_failure().await;
        cb.on_failure().await;
        cb.on_failure().await;
        cb.on_success().await;
        let snap = cb.snapshot().await;
        assert_eq!(snap.failure_count, 2);
    }

    #[tokio::test]
    async fn probe_failure_reopens_and_resets_timer() {
        let cb = CircuitBreaker::new("test", 1, Duration::from_millis(50));
        cb.on_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cb.allow_tick().await);
        cb.on_failure().await;

        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.allow_tick().await);
    }
}
