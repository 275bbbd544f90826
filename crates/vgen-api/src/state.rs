//! Application state.

use std::sync::Arc;

use vgen_queue::{JobQueue, MetricsSink, QueueConfig, RedisJobQueue, SystemClock};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub queue: Arc<dyn JobQueue>,
}

impl AppState {
    /// Create state backed by the production Redis queue.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let queue = RedisJobQueue::new(
            QueueConfig::from_env(),
            Arc::new(SystemClock),
            vec![Arc::new(MetricsSink)],
        )?;
        queue.init().await?;

        Ok(Self {
            config,
            queue: Arc::new(queue),
        })
    }

    /// Create state around an existing queue (tests, embedded use).
    pub fn with_queue(config: ApiConfig, queue: Arc<dyn JobQueue>) -> Self {
        Self { config, queue }
    }
}
