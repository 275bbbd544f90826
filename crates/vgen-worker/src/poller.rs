//! Provider status poller.
//!
//! Drives one submitted generation through its provider-side lifecycle:
//!
//! ```text
//! SUBMITTED -> POLLING -> { COMPLETED, FAILED, TIMED_OUT }
//! ```
//!
//! The poller always performs at least one poll, so a provider that reports
//! completion immediately is handled without waiting a full interval. The
//! inter-poll sleep goes through the injected clock and is the only
//! suspension point in a job's execution.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use vgen_models::FailureKind;
use vgen_providers::{PollStatus, ProviderAdapter, ProviderResult};
use vgen_queue::Clock;

/// Poller tuning.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Delay between polls
    pub interval: std::time::Duration,
    /// Maximum polls before giving up
    pub max_polls: u32,
    /// Progress ceiling until a real completion signal arrives
    pub progress_cap: u8,
}

/// Terminal poller outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum PollerOutcome {
    /// Provider finished and returned a (provider-hosted) result URL.
    Completed {
        result_url: String,
        thumbnail_url: Option<String>,
    },
    /// Provider reported an explicit failure; message verbatim.
    Failed { kind: FailureKind, message: String },
    /// The poll budget ran out while the provider was still working.
    /// Treated like a failure by callers, tagged distinctly for diagnostics.
    TimedOut { polls: u32 },
}

/// Receiver for fractional progress updates.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, progress: u8);
}

/// Sink that discards progress updates.
pub struct NoopProgress;

#[async_trait]
impl ProgressSink for NoopProgress {
    async fn report(&self, _progress: u8) {}
}

/// Polls one provider job to a terminal outcome.
pub struct StatusPoller {
    adapter: Arc<dyn ProviderAdapter>,
    clock: Arc<dyn Clock>,
    config: PollerConfig,
}

impl StatusPoller {
    pub fn new(adapter: Arc<dyn ProviderAdapter>, clock: Arc<dyn Clock>, config: PollerConfig) -> Self {
        Self {
            adapter,
            clock,
            config,
        }
    }

    /// Fractional progress for the nth poll: `min(n / max_polls, cap)`,
    /// expressed as a 0-100 percentage. Provider-reported progress wins when
    /// it is further along.
    fn progress_for(&self, poll: u32, provider_progress: Option<f32>) -> u8 {
        let cap = self.config.progress_cap.min(99);
        let fraction = (poll as u64 * 100 / self.config.max_polls.max(1) as u64) as u8;
        let reported = provider_progress
            .map(|p| (p.clamp(0.0, 1.0) * 100.0) as u8)
            .unwrap_or(0);
        fraction.max(reported).min(cap)
    }

    /// Run the poll loop for `provider_job_id`.
    ///
    /// Transient poll errors propagate to the caller for job-level
    /// classification; a provider-reported failure is a *successful* poll
    /// with a `Failed` outcome.
    pub async fn run(
        &self,
        provider_job_id: &str,
        progress: &dyn ProgressSink,
    ) -> ProviderResult<PollerOutcome> {
        for poll in 1..=self.config.max_polls {
            match self.adapter.poll_status(provider_job_id).await? {
                PollStatus::Completed {
                    result_url,
                    thumbnail_url,
                } => {
                    progress.report(100).await;
                    debug!(provider_job_id, polls = poll, "Provider reported completion");
                    return Ok(PollerOutcome::Completed {
                        result_url,
                        thumbnail_url,
                    });
                }
                PollStatus::Failed { kind, message } => {
                    debug!(provider_job_id, polls = poll, "Provider reported failure");
                    return Ok(PollerOutcome::Failed { kind, message });
                }
                PollStatus::Running {
                    progress: reported, ..
                } => {
                    progress.report(self.progress_for(poll, reported)).await;
                    if poll == self.config.max_polls {
                        break;
                    }
                    self.clock.sleep(self.config.interval).await;
                }
            }
        }

        Ok(PollerOutcome::TimedOut {
            polls: self.config.max_polls,
        })
    }
}
