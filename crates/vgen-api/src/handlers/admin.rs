//! Admin handlers: queue aggregates, failure samples, retention sweeps.

use std::time::Duration;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use vgen_models::JobState;
use vgen_queue::{FailureSample, StatusCounts};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Query parameters for the queue overview.
#[derive(Debug, Deserialize)]
pub struct QueueOverviewQuery {
    /// Failure sample size
    #[serde(default = "default_failure_limit")]
    pub failures: usize,
}

fn default_failure_limit() -> usize {
    20
}

/// Queue overview response.
#[derive(Debug, Serialize)]
pub struct QueueOverviewResponse {
    pub counts: StatusCounts,
    pub recent_failures: Vec<FailureEntry>,
}

/// One recent failure.
#[derive(Debug, Serialize)]
pub struct FailureEntry {
    pub job_id: String,
    pub error_message: String,
    pub attempts: u32,
    pub timestamp: String,
}

impl From<FailureSample> for FailureEntry {
    fn from(sample: FailureSample) -> Self {
        Self {
            job_id: sample.id.to_string(),
            error_message: sample.error_message,
            attempts: sample.attempts,
            timestamp: sample.timestamp.to_rfc3339(),
        }
    }
}

/// GET /api/admin/queue
pub async fn queue_overview(
    State(state): State<AppState>,
    Query(query): Query<QueueOverviewQuery>,
) -> ApiResult<Json<QueueOverviewResponse>> {
    let counts = state.queue.counts().await?;
    let recent_failures = state
        .queue
        .recent_failures(query.failures.min(100))
        .await?
        .into_iter()
        .map(FailureEntry::from)
        .collect();

    Ok(Json(QueueOverviewResponse {
        counts,
        recent_failures,
    }))
}

/// Clean request body.
#[derive(Debug, Deserialize)]
pub struct CleanRequest {
    /// Grace period in seconds; terminal jobs older than this are eligible
    pub older_than_secs: u64,
    /// States to sweep; defaults to both terminal states
    #[serde(default)]
    pub states: Option<Vec<String>>,
    /// Eviction cap for this call
    #[serde(default = "default_clean_limit")]
    pub limit: usize,
}

fn default_clean_limit() -> usize {
    100
}

/// Clean response body.
#[derive(Debug, Serialize)]
pub struct CleanResponse {
    pub evicted: u64,
}

/// POST /api/admin/clean
pub async fn clean_jobs(
    State(state): State<AppState>,
    Json(request): Json<CleanRequest>,
) -> ApiResult<Json<CleanResponse>> {
    let states = match request.states {
        Some(names) => {
            let mut states = Vec::with_capacity(names.len());
            for name in names {
                match name.as_str() {
                    "completed" => states.push(JobState::Completed),
                    "failed" => states.push(JobState::Failed),
                    other => {
                        return Err(ApiError::bad_request(format!(
                            "not a terminal state: {other}"
                        )))
                    }
                }
            }
            states
        }
        None => vec![JobState::Completed, JobState::Failed],
    };

    let evicted = state
        .queue
        .clean(
            Duration::from_secs(request.older_than_secs),
            &states,
            request.limit.min(1000),
        )
        .await?;

    info!(evicted, "Admin clean sweep");
    Ok(Json(CleanResponse { evicted }))
}
