use thiserror::Error;

/// Any remote call failure surfaced by a collector or the HTTP layer.
#[derive(Debug, Error)]
#[error("external service error [{service}]: {details}")]
pub struct ExternalServiceError {
    pub service: String,
    pub status_code: Option<u16>,
    pub details: String,
}

/// Raised by the scheduler to skip a tick while a collector's breaker is open.
#[derive(Debug, Error)]
#[error("circuit breaker open for {service}")]
pub struct CircuitBreakerOpen {
    pub service: String,
}

/// Surfaced to push handlers so they can emit a 429 with Retry-After.
#[derive(Debug, Error)]
#[error("rate limited, retry after {retry_after_seconds}s")]
pub struct RateLimitError {
    pub retry_after_seconds: u64,
}

/// Publisher batch partial-failure report.
#[derive(Debug, Error)]
#[error("publish batch failed: {failed}/{total} events failed")]
pub struct PubSubError {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub first_errors: Vec<String>,
}

/// Bad input to a pure operator.
#[derive(Debug, Error)]
#[error("validation error on {field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

/// Umbrella error for code paths that can fail in more than one of the above ways.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    ExternalService(#[from] ExternalServiceError),
    #[error(transparent)]
    CircuitBreakerOpen(#[from] CircuitBreakerOpen),
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
    #[error(transparent)]
    PubSub(#[from] PubSubError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pubsub_error_formats_counts() {
        let err = PubSubError {
            total: 10,
            succeeded: 8,
            failed: 2,
            first_errors: vec!["boom".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("2/10"));
    }

    #[test]
    fn rate_limit_formats_seconds() {
        let err = RateLimitError {
            retry_after_seconds: 30,
        };
        assert!(err.to_string().contains("30s"));
    }
}
