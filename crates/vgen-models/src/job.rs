//! Job records and lifecycle state.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{GenerationRequest, Provider};

/// Unique identifier for a job.
///
/// Caller-supplied and immutable; doubles as the idempotency key for
/// enqueueing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job state in the queue.
///
/// Transitions are monotonic: `Pending -> Processing -> {Completed, Failed}`,
/// with `Processing -> Pending` allowed only when the queue reschedules a
/// retryable failure. Terminal states never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in queue (possibly delayed for a retry)
    #[default]
    Pending,
    /// Claimed by a worker and executing
    Processing,
    /// Finished successfully
    Completed,
    /// Finished with a terminal failure
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn default_max_attempts() -> u32 {
    3
}

/// Per-job execution options, resolved at enqueue time from the caller's
/// overrides and the queue defaults.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobOptions {
    /// Maximum execution attempts before the job is terminally failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff delay override in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_base_ms: Option<u64>,

    /// Retention override for completed jobs, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain_completed_secs: Option<u64>,

    /// Retention override for failed jobs, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain_failed_secs: Option<u64>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: None,
            retain_completed_secs: None,
            retain_failed_secs: None,
        }
    }
}

impl JobOptions {
    pub fn backoff_base(&self) -> Option<Duration> {
        self.backoff_base_ms.map(Duration::from_millis)
    }

    /// Retention window for a given terminal state, if overridden.
    pub fn retention_for(&self, state: JobState) -> Option<Duration> {
        match state {
            JobState::Completed => self.retain_completed_secs.map(Duration::from_secs),
            JobState::Failed => self.retain_failed_secs.map(Duration::from_secs),
            _ => None,
        }
    }
}

/// One unit of work: a single requested video generation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Caller-supplied unique ID (idempotency key)
    pub id: JobId,

    /// Rendering provider this job targets
    pub provider: Provider,

    /// Generation parameters, interpreted by the provider adapter
    pub request: GenerationRequest,

    /// Current lifecycle state
    #[serde(default)]
    pub state: JobState,

    /// Provider-side job identity, assigned at most once per attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_job_id: Option<String>,

    /// Durable URL of the stored result, set on completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,

    /// Durable URL of the stored thumbnail, set on completion when available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,

    /// Last failure message, kept verbatim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Execution attempts made so far
    #[serde(default)]
    pub attempts: u32,

    /// Progress (0-100)
    #[serde(default)]
    pub progress: u8,

    /// Resolved per-job options
    #[serde(default)]
    pub options: JobOptions,

    /// Earliest time the job may be dispatched (moved forward on retry)
    pub run_at: DateTime<Utc>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// When the current/last attempt started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(id: JobId, provider: Provider, request: GenerationRequest, options: JobOptions) -> Self {
        let now = Utc::now();
        Self {
            id,
            provider,
            request,
            state: JobState::Pending,
            provider_job_id: None,
            result_url: None,
            thumbnail_url: None,
            error_message: None,
            attempts: 0,
            progress: 0,
            options,
            run_at: now,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Whether the job is eligible for dispatch at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Pending && self.run_at <= now
    }

    /// Start a new execution attempt.
    ///
    /// Consumes one attempt, clears the previous attempt's provider identity
    /// and progress. Returns `false` if the job is in a terminal state.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = JobState::Processing;
        self.attempts += 1;
        self.provider_job_id = None;
        self.progress = 0;
        self.started_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Record the provider-side job identity.
    ///
    /// Returns `false` if an identity was already assigned in this attempt:
    /// a job is never resubmitted within the same attempt.
    pub fn assign_provider_job(&mut self, provider_job_id: impl Into<String>, now: DateTime<Utc>) -> bool {
        if self.state != JobState::Processing || self.provider_job_id.is_some() {
            return false;
        }
        self.provider_job_id = Some(provider_job_id.into());
        self.updated_at = now;
        true
    }

    /// Update fractional progress.
    pub fn set_progress(&mut self, progress: u8, now: DateTime<Utc>) {
        if self.state.is_terminal() {
            return;
        }
        self.progress = progress.min(100);
        self.updated_at = now;
    }

    /// Transition to `Completed` with the stored artifact URLs.
    pub fn complete(
        &mut self,
        result_url: impl Into<String>,
        thumbnail_url: Option<String>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.state != JobState::Processing {
            return false;
        }
        self.state = JobState::Completed;
        self.result_url = Some(result_url.into());
        self.thumbnail_url = thumbnail_url;
        self.error_message = None;
        self.progress = 100;
        self.completed_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Transition to terminal `Failed`, retaining the message verbatim.
    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = JobState::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Put the job back in `Pending` for a later attempt.
    ///
    /// Used both for scheduled retries (with a future `run_at`) and for the
    /// manual retry operation (`run_at = now`). The last failure message is
    /// kept for diagnostics until the next attempt resolves.
    pub fn reschedule(
        &mut self,
        message: Option<String>,
        run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.state == JobState::Completed {
            return false;
        }
        self.state = JobState::Pending;
        if let Some(message) = message {
            self.error_message = Some(message);
        }
        self.run_at = run_at;
        self.completed_at = None;
        self.updated_at = now;
        true
    }

    /// Whether the attempt budget still allows another execution.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.options.max_attempts
    }
}
