use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub poll_interval_seconds: u64,
}

impl CollectorConfig {
    fn from_env(prefix: &str, default_interval: u64) -> Result<Self> {
        let enabled = env::var(format!("ENABLE_{prefix}_COLLECTOR"))
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        let api_key = env::var(format!("{prefix}_API_KEY")).ok();

        let poll_interval_seconds = env::var(format!("{prefix}_POLL_INTERVAL_SECONDS"))
            .unwrap_or_else(|_| default_interval.to_string())
            .parse::<u64>()
            .context(format!("Failed to parse {prefix}_POLL_INTERVAL_SECONDS"))?;

        Ok(Self {
            enabled,
            api_key,
            poll_interval_seconds,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub topic_prefix: String,
    pub admin_api_key: Option<String>,
    pub log_level: String,

    pub exchange: CollectorConfig,
    pub rss: CollectorConfig,
    pub spot_metal: CollectorConfig,
    pub central_bank: CollectorConfig,
    pub social: CollectorConfig,

    pub breaker_failure_threshold: usize,
    pub breaker_reset_timeout_seconds: u64,
    pub scheduler_shutdown_grace_seconds: u64,

    pub push_queue_capacity: usize,
    pub push_handler_port: u16,
    pub admin_port: u16,

    pub daily_quota_limit: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let topic_prefix = env::var("TOPIC_PREFIX").unwrap_or_else(|_| "sentilyze".to_string());
        let admin_api_key = env::var("ADMIN_API_KEY").ok();
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let exchange = CollectorConfig::from_env("EXCHANGE", 30)?;
        let rss = CollectorConfig::from_env("RSS", 300)?;
        let spot_metal = CollectorConfig::from_env("SPOT_METAL", 60)?;
        let central_bank = CollectorConfig::from_env("CENTRAL_BANK", 600)?;
        let social = CollectorConfig::from_env("SOCIAL", 300)?;

        let breaker_failure_threshold = env::var("BREAKER_FAILURE_THRESHOLD")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<usize>()
            .context("Failed to parse BREAKER_FAILURE_THRESHOLD")?;

        let breaker_reset_timeout_seconds = env::var("BREAKER_RESET_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "300".to_string())
            .parse::<u64>()
            .context("Failed to parse BREAKER_RESET_TIMEOUT_SECONDS")?;

        let scheduler_shutdown_grace_seconds = env::var("SCHEDULER_SHUTDOWN_GRACE_SECONDS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .context("Failed to parse SCHEDULER_SHUTDOWN_GRACE_SECONDS")?;

        let push_queue_capacity = env::var("PUSH_QUEUE_CAPACITY")
            .unwrap_or_else(|_| "256".to_string())
            .parse::<usize>()
            .context("Failed to parse PUSH_QUEUE_CAPACITY")?;

        let push_handler_port = env::var("PUSH_HANDLER_PORT")
            .unwrap_or_else(|_| "8081".to_string())
            .parse::<u16>()
            .context("Failed to parse PUSH_HANDLER_PORT")?;

        let admin_port = env::var("ADMIN_PORT")
            .unwrap_or_else(|_| "8082".to_string())
            .parse::<u16>()
            .context("Failed to parse ADMIN_PORT")?;

        let daily_quota_limit = env::var("DAILY_QUOTA_LIMIT")
            .unwrap_or_else(|_| "1000".to_string())
            .parse::<u32>()
            .context("Failed to parse DAILY_QUOTA_LIMIT")?;

        Ok(Self {
            topic_prefix,
            admin_api_key,
            log_level,
            exchange,
            rss,
            spot_metal,
            central_bank,
            social,
            breaker_failure_threshold,
            breaker_reset_timeout_seconds,
            scheduler_shutdown_grace_seconds,
            push_queue_capacity,
            push_handler_port,
            admin_port,
            daily_quota_limit,
        })
    }
}
