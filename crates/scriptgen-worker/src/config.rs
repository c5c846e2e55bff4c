//! Worker configuration.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// How long one XREADGROUP call blocks
    pub consume_block: Duration,
    /// Maximum messages read per call
    pub consume_batch: usize,
    /// How often the worker should scan for orphaned pending messages
    pub claim_interval: Duration,
    /// Minimum idle time before a pending message can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// Timeout for a single generation backend call
    pub backend_timeout: Duration,
    /// Delay between result delivery attempts while no channel is bound
    pub delivery_retry_delay: Duration,
    /// Delivery retries after the first attempt
    pub delivery_max_retries: u32,
    /// Liveness sweep interval for registered channels
    pub heartbeat_interval: Duration,
    /// Pause before the consume loop reconnects after an infrastructure error
    pub error_backoff: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            consume_block: Duration::from_millis(1000),
            consume_batch: 5,
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300), // 5 minutes
            backend_timeout: Duration::from_secs(60),
            delivery_retry_delay: Duration::from_secs(1),
            delivery_max_retries: 3,
            heartbeat_interval: Duration::from_secs(30),
            error_backoff: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: env_parse("WORKER_MAX_JOBS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            consume_block: env_parse("WORKER_CONSUME_BLOCK_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.consume_block),
            consume_batch: env_parse("WORKER_CONSUME_BATCH")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.consume_batch),
            claim_interval: env_parse("WORKER_CLAIM_INTERVAL_SECS")
                .filter(|n: &u64| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_interval),
            claim_min_idle: env_parse("WORKER_CLAIM_MIN_IDLE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_min_idle),
            backend_timeout: env_parse("WORKER_BACKEND_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.backend_timeout),
            delivery_retry_delay: env_parse("WORKER_DELIVERY_RETRY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.delivery_retry_delay),
            delivery_max_retries: env_parse("WORKER_DELIVERY_MAX_RETRIES")
                .unwrap_or(defaults.delivery_max_retries),
            heartbeat_interval: env_parse("WORKER_HEARTBEAT_SECS")
                .filter(|n: &u64| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_interval),
            error_backoff: env_parse("WORKER_ERROR_BACKOFF_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.error_backoff),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
        }
    }

    /// Retry policy used by result delivery.
    pub fn delivery_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.delivery_retry_delay, self.delivery_max_retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.backend_timeout, Duration::from_secs(60));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.error_backoff, Duration::from_secs(5));

        let policy = config.delivery_policy();
        assert_eq!(policy.delay, Duration::from_secs(1));
        assert_eq!(policy.max_retries, 3);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var("WORKER_MAX_JOBS", "8");
        std::env::set_var("WORKER_DELIVERY_RETRY_MS", "250");
        std::env::set_var("WORKER_HEARTBEAT_SECS", "0");
        std::env::set_var("WORKER_CLAIM_INTERVAL_SECS", "0");

        let config = WorkerConfig::from_env();
        assert_eq!(config.max_concurrent_jobs, 8);
        assert_eq!(config.delivery_retry_delay, Duration::from_millis(250));
        // Zero would make the sweep spin, so it falls back to the default
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        // A zero claim interval would panic the claim ticker
        assert_eq!(config.claim_interval, WorkerConfig::default().claim_interval);
        assert!(!config.claim_interval.is_zero());

        std::env::remove_var("WORKER_MAX_JOBS");
        std::env::remove_var("WORKER_DELIVERY_RETRY_MS");
        std::env::remove_var("WORKER_HEARTBEAT_SECS");
        std::env::remove_var("WORKER_CLAIM_INTERVAL_SECS");
    }
}
