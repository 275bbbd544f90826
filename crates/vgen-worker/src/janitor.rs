//! Retention janitor.
//!
//! Terminal job records stay queryable for their retention window, then get
//! evicted in bounded batches. The durable history lives with the
//! `JobRepository` collaborator; eviction only trims the queue's own table.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, error, info};

use vgen_models::JobState;
use vgen_queue::{JobQueue, QueueResult};

/// Periodic retention sweep over terminal jobs.
pub struct Janitor {
    queue: Arc<dyn JobQueue>,
    sweep_interval: Duration,
    retain_completed: Duration,
    retain_failed: Duration,
    batch_limit: usize,
}

impl Janitor {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        sweep_interval: Duration,
        retain_completed: Duration,
        retain_failed: Duration,
        batch_limit: usize,
    ) -> Self {
        Self {
            queue,
            sweep_interval,
            retain_completed,
            retain_failed,
            batch_limit,
        }
    }

    /// Run forever; spawn as a background task.
    pub async fn run(&self) {
        info!(interval = ?self.sweep_interval, "Starting retention janitor");
        let mut ticker = interval(self.sweep_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep().await {
                error!("Retention sweep failed: {e}");
            }
        }
    }

    /// One bounded sweep over completed and failed jobs.
    pub async fn sweep(&self) -> QueueResult<u64> {
        let completed = self
            .queue
            .clean(self.retain_completed, &[JobState::Completed], self.batch_limit)
            .await?;
        let failed = self
            .queue
            .clean(self.retain_failed, &[JobState::Failed], self.batch_limit)
            .await?;

        let evicted = completed + failed;
        if evicted > 0 {
            debug!(completed, failed, "Evicted expired terminal jobs");
        }
        Ok(evicted)
    }
}
