use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Seconds between settlement scheduler ticks
    pub tick_interval_secs: u64,
    /// Winners/bettors processed per Phase 2 invocation
    pub batch_size: i64,
    /// Seconds a poll must be closed before it becomes claimable
    pub grace_period_secs: i64,
    /// Seconds after which an in-progress settlement counts as abandoned
    pub liveness_window_secs: i64,
    /// Soft wall-clock budget for a single tick
    pub tick_budget_ms: u64,
    /// Recorded as settled_by on finalized polls
    pub worker_id: String,
    /// Outcome notifications are POSTed here; unset means notifications are dropped
    pub notify_webhook_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/pollhouse".to_string()),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            tick_interval_secs: env_parse("SETTLE_TICK_INTERVAL_SECS", 10),
            batch_size: env_parse("SETTLE_BATCH_SIZE", 50),
            grace_period_secs: env_parse("SETTLE_GRACE_PERIOD_SECS", 60),
            liveness_window_secs: env_parse("SETTLE_LIVENESS_WINDOW_SECS", 300),
            tick_budget_ms: env_parse("SETTLE_TICK_BUDGET_MS", 5_000),
            worker_id: std::env::var("SETTLE_WORKER_ID")
                .unwrap_or_else(|_| "settlement-worker-1".to_string()),
            notify_webhook_url: std::env::var("NOTIFY_WEBHOOK_URL").ok(),
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        let config = Config::from_env().unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.tick_budget_ms, 5_000);
    }
}
