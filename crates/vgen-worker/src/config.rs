//! Worker configuration.

use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum simultaneously in-flight jobs, shared across the pool
    pub concurrency: usize,
    /// Maximum jobs started per rate-limit window
    pub rate_limit_count: u32,
    /// Rolling rate-limit window
    pub rate_limit_window: Duration,
    /// Delay between provider status polls
    pub poll_interval: Duration,
    /// Maximum status polls before an attempt times out
    pub max_poll_attempts: u32,
    /// Progress ceiling while polling (real completion reports 100)
    pub progress_cap: u8,
    /// Idle wait when the queue is empty
    pub idle_wait: Duration,
    /// Graceful shutdown timeout for in-flight jobs
    pub shutdown_timeout: Duration,
    /// Worker heartbeat interval
    pub heartbeat_interval: Duration,
    /// Interval between pending-reclaim scans (crash recovery)
    pub reclaim_interval: Duration,
    /// Interval between retention sweeps
    pub janitor_interval: Duration,
    /// Storage key prefix for stored results
    pub result_prefix: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            rate_limit_count: 30,
            rate_limit_window: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
            max_poll_attempts: 120, // 5s * 120 = 10 minutes
            progress_cap: 95,
            idle_wait: Duration::from_millis(200),
            shutdown_timeout: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(30),
            reclaim_interval: Duration::from_secs(30),
            janitor_interval: Duration::from_secs(300),
            result_prefix: "results".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            concurrency: env_parsed("WORKER_CONCURRENCY", defaults.concurrency),
            rate_limit_count: env_parsed("WORKER_RATE_LIMIT_COUNT", defaults.rate_limit_count),
            rate_limit_window: Duration::from_secs(env_parsed(
                "WORKER_RATE_LIMIT_WINDOW_SECS",
                defaults.rate_limit_window.as_secs(),
            )),
            poll_interval: Duration::from_millis(env_parsed(
                "WORKER_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )),
            max_poll_attempts: env_parsed("WORKER_MAX_POLL_ATTEMPTS", defaults.max_poll_attempts),
            progress_cap: env_parsed("WORKER_PROGRESS_CAP", defaults.progress_cap),
            idle_wait: Duration::from_millis(env_parsed(
                "WORKER_IDLE_WAIT_MS",
                defaults.idle_wait.as_millis() as u64,
            )),
            shutdown_timeout: Duration::from_secs(env_parsed(
                "WORKER_SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout.as_secs(),
            )),
            heartbeat_interval: Duration::from_secs(env_parsed(
                "WORKER_HEARTBEAT_SECS",
                defaults.heartbeat_interval.as_secs(),
            )),
            reclaim_interval: Duration::from_secs(env_parsed(
                "WORKER_RECLAIM_INTERVAL_SECS",
                defaults.reclaim_interval.as_secs(),
            )),
            janitor_interval: Duration::from_secs(env_parsed(
                "WORKER_JANITOR_INTERVAL_SECS",
                defaults.janitor_interval.as_secs(),
            )),
            result_prefix: std::env::var("WORKER_RESULT_PREFIX").unwrap_or(defaults.result_prefix),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
