//! Queue lifecycle events.
//!
//! Every mutating queue operation emits an event. Sinks are fire-and-forget
//! collaborators: persistence (see `repository::RepositorySink`), metrics,
//! or anything a deployment wires in. A failing sink is logged, never
//! propagated into the job lifecycle.

use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;

use vgen_models::Job;

/// A job lifecycle event, carrying the post-transition snapshot.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// Job inserted into the queue
    Created(Job),
    /// A worker started an execution attempt
    Started(Job),
    /// Job finished successfully
    Completed(Job),
    /// Job reached terminal failure
    Failed(Job),
    /// Job rescheduled for another attempt
    Retried { job: Job, delay: Duration },
    /// Job removed before execution
    Cancelled(Job),
}

impl JobEvent {
    pub fn job(&self) -> &Job {
        match self {
            JobEvent::Created(job)
            | JobEvent::Started(job)
            | JobEvent::Completed(job)
            | JobEvent::Failed(job)
            | JobEvent::Cancelled(job) => job,
            JobEvent::Retried { job, .. } => job,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Created(_) => "created",
            JobEvent::Started(_) => "started",
            JobEvent::Completed(_) => "completed",
            JobEvent::Failed(_) => "failed",
            JobEvent::Retried { .. } => "retried",
            JobEvent::Cancelled(_) => "cancelled",
        }
    }
}

/// Consumer of queue events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn on_event(&self, event: &JobEvent);
}

/// Metric names.
pub mod names {
    pub const JOBS_ENQUEUED_TOTAL: &str = "vgen_jobs_enqueued_total";
    pub const JOBS_STARTED_TOTAL: &str = "vgen_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vgen_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vgen_jobs_failed_total";
    pub const JOBS_RETRIED_TOTAL: &str = "vgen_jobs_retried_total";
    pub const JOBS_CANCELLED_TOTAL: &str = "vgen_jobs_cancelled_total";
}

/// Sink that increments job lifecycle counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSink;

#[async_trait]
impl EventSink for MetricsSink {
    async fn on_event(&self, event: &JobEvent) {
        let provider = event.job().provider.as_str();
        let labels = [("provider", provider.to_string())];
        let name = match event {
            JobEvent::Created(_) => names::JOBS_ENQUEUED_TOTAL,
            JobEvent::Started(_) => names::JOBS_STARTED_TOTAL,
            JobEvent::Completed(_) => names::JOBS_COMPLETED_TOTAL,
            JobEvent::Failed(_) => names::JOBS_FAILED_TOTAL,
            JobEvent::Retried { .. } => names::JOBS_RETRIED_TOTAL,
            JobEvent::Cancelled(_) => names::JOBS_CANCELLED_TOTAL,
        };
        counter!(name, &labels).increment(1);
    }
}
