//! The job queue contract.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vgen_models::{GenerationRequest, Job, JobFailure, JobId, JobOptions, JobState, Provider};

use crate::error::QueueResult;

/// Queue configuration shared by both implementations.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for job dispatch
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Key prefix for job records and indexes
    pub key_prefix: String,
    /// Default maximum execution attempts
    pub max_attempts: u32,
    /// Default base backoff delay
    pub base_delay: Duration,
    /// Upper bound on any retry delay
    pub cap_delay: Duration,
    /// Upper bound on retry jitter
    pub max_jitter: Duration,
    /// Default retention for completed jobs
    pub retain_completed: Duration,
    /// Default retention for failed jobs
    pub retain_failed: Duration,
    /// Maximum evictions per `clean` call
    pub clean_batch_limit: usize,
    /// How long a worker heartbeat counts as alive
    pub worker_ttl: Duration,
    /// How long a blocking dequeue waits for a new entry
    pub block_timeout: Duration,
    /// Minimum idle time before another consumer's pending entry may be reclaimed
    pub claim_min_idle: Duration,
    /// Size of the recent-failure sample ring
    pub failure_sample_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "vgen:jobs".to_string(),
            consumer_group: "vgen:workers".to_string(),
            key_prefix: "vgen".to_string(),
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            cap_delay: Duration::from_secs(300),
            max_jitter: Duration::from_millis(1000),
            retain_completed: Duration::from_secs(24 * 3600),
            retain_failed: Duration::from_secs(7 * 24 * 3600),
            clean_batch_limit: 100,
            worker_ttl: Duration::from_secs(90),
            block_timeout: Duration::from_secs(1),
            claim_min_idle: Duration::from_secs(300),
            failure_sample_size: 100,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            key_prefix: std::env::var("QUEUE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            max_attempts: env_parsed("QUEUE_MAX_ATTEMPTS", defaults.max_attempts),
            base_delay: Duration::from_millis(env_parsed(
                "QUEUE_BASE_DELAY_MS",
                defaults.base_delay.as_millis() as u64,
            )),
            cap_delay: Duration::from_millis(env_parsed(
                "QUEUE_CAP_DELAY_MS",
                defaults.cap_delay.as_millis() as u64,
            )),
            max_jitter: Duration::from_millis(env_parsed(
                "QUEUE_MAX_JITTER_MS",
                defaults.max_jitter.as_millis() as u64,
            )),
            retain_completed: Duration::from_secs(env_parsed(
                "QUEUE_RETAIN_COMPLETED_SECS",
                defaults.retain_completed.as_secs(),
            )),
            retain_failed: Duration::from_secs(env_parsed(
                "QUEUE_RETAIN_FAILED_SECS",
                defaults.retain_failed.as_secs(),
            )),
            clean_batch_limit: env_parsed("QUEUE_CLEAN_BATCH_LIMIT", defaults.clean_batch_limit),
            worker_ttl: Duration::from_secs(env_parsed(
                "QUEUE_WORKER_TTL_SECS",
                defaults.worker_ttl.as_secs(),
            )),
            block_timeout: Duration::from_millis(env_parsed(
                "QUEUE_BLOCK_TIMEOUT_MS",
                defaults.block_timeout.as_millis() as u64,
            )),
            claim_min_idle: Duration::from_secs(env_parsed(
                "QUEUE_CLAIM_MIN_IDLE_SECS",
                defaults.claim_min_idle.as_secs(),
            )),
            failure_sample_size: env_parsed(
                "QUEUE_FAILURE_SAMPLE_SIZE",
                defaults.failure_sample_size,
            ),
        }
    }

    /// Retention window for a terminal state, honoring a per-job override.
    pub fn retention_for(&self, job: &Job, state: JobState) -> Duration {
        job.options.retention_for(state).unwrap_or(match state {
            JobState::Failed => self.retain_failed,
            _ => self.retain_completed,
        })
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// A job submission, before the queue has resolved options and timestamps.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: JobId,
    pub provider: Provider,
    pub request: GenerationRequest,
}

/// Caller overrides applied at enqueue time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnqueueOptions {
    /// Maximum execution attempts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Base backoff delay in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_base_ms: Option<u64>,
    /// Retention for the completed record, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain_completed_secs: Option<u64>,
    /// Retention for the failed record, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain_failed_secs: Option<u64>,
}

impl EnqueueOptions {
    /// Resolve against queue defaults.
    pub fn resolve(&self, config: &QueueConfig) -> JobOptions {
        JobOptions {
            max_attempts: self.max_attempts.unwrap_or(config.max_attempts).max(1),
            backoff_base_ms: self.backoff_base_ms,
            retain_completed_secs: self.retain_completed_secs,
            retain_failed_secs: self.retain_failed_secs,
        }
    }
}

/// Result of an enqueue call.
#[derive(Debug, Clone)]
pub enum EnqueueOutcome {
    /// A new job record was created.
    Created(Job),
    /// A job with this ID already exists; the call was a no-op.
    Duplicate(Job),
}

impl EnqueueOutcome {
    pub fn job(&self) -> &Job {
        match self {
            EnqueueOutcome::Created(job) | EnqueueOutcome::Duplicate(job) => job,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, EnqueueOutcome::Duplicate(_))
    }
}

/// A claimed job, owned by exactly one worker until acked.
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub job: Job,
    /// Opaque lease token, passed back on ack.
    pub lease: String,
}

/// Result of a cancel call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Removed before any worker claimed it.
    Cancelled,
    /// Already executing; the in-flight attempt runs to completion.
    InFlight,
    /// Already in a terminal state.
    Terminal,
    /// No such job.
    NotFound,
}

/// What the queue decided after a reported failure.
#[derive(Debug, Clone)]
pub enum FailureDisposition {
    /// Rescheduled for another attempt after `delay`.
    Retried { delay: Duration, attempts: u32 },
    /// Terminally failed; the snapshot carries the verbatim error message.
    Failed { job: Job },
}

/// Aggregate counts by status for the admin contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Pending and eligible for dispatch
    pub waiting: u64,
    /// Currently executing
    pub active: u64,
    /// Terminal success
    pub completed: u64,
    /// Terminal failure
    pub failed: u64,
    /// Pending but scheduled in the future (retry backoff)
    pub delayed: u64,
}

/// One entry in the recent-failure sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureSample {
    pub id: JobId,
    pub error_message: String,
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

/// Durable, idempotent job store with dispatch.
///
/// Implementations guarantee:
/// - enqueue is idempotent by job ID
/// - a job is claimed by at most one worker at a time
/// - state transitions are monotonic; terminal states never regress
/// - every mutation emits a `JobEvent` to the configured sinks
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Insert a job keyed by its ID. Re-enqueueing an existing ID is a
    /// no-op returning the current record.
    async fn enqueue(&self, new: NewJob, options: EnqueueOptions) -> QueueResult<EnqueueOutcome>;

    /// Claim the next eligible job for `consumer`, waiting up to the
    /// configured block timeout. Returns `None` when nothing is due.
    async fn dequeue(&self, consumer: &str) -> QueueResult<Option<LeasedJob>>;

    /// Reclaim jobs whose consumer stopped heartbeating mid-attempt.
    /// May return an empty list on implementations without cross-process
    /// ownership (the in-memory queue).
    async fn reclaim(&self, consumer: &str, limit: usize) -> QueueResult<Vec<LeasedJob>>;

    /// Release a lease at the end of an attempt. Always called, whether the
    /// attempt completed, failed terminally, or was rescheduled.
    async fn ack(&self, id: &JobId, lease: &str) -> QueueResult<()>;

    /// Current job snapshot, or `None` if unknown/evicted.
    async fn get(&self, id: &JobId) -> QueueResult<Option<Job>>;

    /// Begin an execution attempt: consume one attempt, move to
    /// `Processing`. Fails with `AttemptsExhausted` (and terminally fails
    /// the job) if the attempt budget is already spent.
    async fn mark_started(&self, id: &JobId) -> QueueResult<Job>;

    /// Record the provider-side identity for the current attempt.
    async fn set_provider_job(&self, id: &JobId, provider_job_id: &str) -> QueueResult<()>;

    /// Update fractional progress (0-100).
    async fn set_progress(&self, id: &JobId, progress: u8) -> QueueResult<()>;

    /// Transition to `Completed` with the stored artifact URLs.
    async fn complete(
        &self,
        id: &JobId,
        result_url: &str,
        thumbnail_url: Option<&str>,
    ) -> QueueResult<Job>;

    /// Report a classified failure. Consults the retry policy exactly once
    /// and either reschedules the job or fails it terminally.
    async fn report_failure(&self, id: &JobId, failure: &JobFailure) -> QueueResult<FailureDisposition>;

    /// Best-effort cancel: removes the job only if no worker claimed it.
    async fn cancel(&self, id: &JobId) -> QueueResult<CancelOutcome>;

    /// Manual retry of a terminally failed job. Errors when the job is not
    /// failed or its attempt budget is exhausted.
    async fn retry(&self, id: &JobId) -> QueueResult<Job>;

    /// Evict terminal jobs older than `older_than` (and their per-job
    /// retention), bounded by `limit` evictions. Returns the count evicted.
    async fn clean(&self, older_than: Duration, states: &[JobState], limit: usize) -> QueueResult<u64>;

    /// Aggregate counts by status.
    async fn counts(&self) -> QueueResult<StatusCounts>;

    /// Most recent terminal failures, newest first.
    async fn recent_failures(&self, limit: usize) -> QueueResult<Vec<FailureSample>>;

    /// Backend reachability check.
    async fn ping(&self) -> QueueResult<()>;

    /// Record that `consumer` is alive.
    async fn worker_heartbeat(&self, consumer: &str) -> QueueResult<()>;

    /// Number of workers with a live heartbeat.
    async fn active_workers(&self) -> QueueResult<u32>;
}
