//! Job handlers: enqueue, status, cancel, retry, cost estimation.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use vgen_models::{GenerationRequest, Job, JobId, Provider};
use vgen_providers::estimate_cost;
use vgen_queue::{CancelOutcome, EnqueueOptions, NewJob};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Enqueue request body.
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    /// Caller-supplied job ID (idempotency key); generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Target provider name
    pub provider: String,
    /// Generation parameters
    pub payload: GenerationRequest,
    /// Queue option overrides
    #[serde(default)]
    pub options: EnqueueOptions,
}

/// Enqueue response body.
#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub job_id: String,
    pub status: String,
    pub duplicate: bool,
    pub estimated_credits: u32,
}

/// Job status response.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub provider: String,
    pub status: String,
    pub progress: u8,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl JobStatusResponse {
    fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            provider: job.provider.to_string(),
            status: job.state.to_string(),
            progress: job.progress,
            attempts: job.attempts,
            result_url: job.result_url.clone(),
            thumbnail_url: job.thumbnail_url.clone(),
            error_message: job.error_message.clone(),
            created_at: job.created_at.to_rfc3339(),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
        }
    }
}

fn parse_provider(name: &str) -> ApiResult<Provider> {
    name.parse::<Provider>().map_err(|e| {
        let supported: Vec<&str> = Provider::all().iter().map(|p| p.as_str()).collect();
        ApiError::bad_request(format!("{e} (supported: {})", supported.join(", ")))
    })
}

fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    if raw.is_empty() || raw.len() > 128 || !raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(ApiError::bad_request("invalid job id format"));
    }
    Ok(JobId::from_string(raw))
}

/// POST /api/jobs
///
/// Returns 202 for a newly accepted job, 200 when the ID already exists
/// (idempotent re-submission).
pub async fn enqueue_job(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> ApiResult<(StatusCode, Json<EnqueueResponse>)> {
    let provider = parse_provider(&request.provider)?;

    request
        .payload
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let id = match &request.id {
        Some(raw) => parse_job_id(raw)?,
        None => JobId::new(),
    };

    let estimated_credits = estimate_cost(provider, &request.payload);

    let outcome = state
        .queue
        .enqueue(
            NewJob {
                id: id.clone(),
                provider,
                request: request.payload,
            },
            request.options,
        )
        .await?;

    let duplicate = outcome.is_duplicate();
    let job = outcome.job();
    info!(job_id = %job.id, provider = %provider, duplicate, "Enqueue request");

    let status = if duplicate {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((
        status,
        Json(EnqueueResponse {
            job_id: job.id.to_string(),
            status: job.state.to_string(),
            duplicate,
            estimated_credits,
        }),
    ))
}

/// GET /api/jobs/:job_id
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let id = parse_job_id(&job_id)?;
    let job = state
        .queue
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("job not found"))?;
    Ok(Json(JobStatusResponse::from_job(&job)))
}

/// Cancel response body.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: String,
    pub cancelled: bool,
}

/// DELETE /api/jobs/:job_id
///
/// Best-effort: a job already claimed by a worker finishes its current
/// attempt; callers needing abort-mid-flight semantics must handle that
/// window themselves.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let id = parse_job_id(&job_id)?;
    match state.queue.cancel(&id).await? {
        CancelOutcome::Cancelled => Ok(Json(CancelResponse {
            job_id: id.to_string(),
            cancelled: true,
        })),
        CancelOutcome::InFlight => Err(ApiError::conflict("job is already executing")),
        CancelOutcome::Terminal => Err(ApiError::conflict("job already finished")),
        CancelOutcome::NotFound => Err(ApiError::not_found("job not found")),
    }
}

/// POST /api/jobs/:job_id/retry
pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let id = parse_job_id(&job_id)?;
    let job = state.queue.retry(&id).await?;
    info!(job_id = %id, "Manual retry accepted");
    Ok(Json(JobStatusResponse::from_job(&job)))
}

/// Cost estimation request body.
#[derive(Debug, Deserialize)]
pub struct EstimateRequest {
    pub provider: String,
    pub payload: GenerationRequest,
}

/// Cost estimation response body.
#[derive(Debug, Serialize)]
pub struct EstimateResponse {
    pub provider: String,
    pub estimated_credits: u32,
}

/// POST /api/estimate
pub async fn estimate_job_cost(
    Json(request): Json<EstimateRequest>,
) -> ApiResult<Json<EstimateResponse>> {
    let provider = parse_provider(&request.provider)?;
    request
        .payload
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    Ok(Json(EstimateResponse {
        provider: provider.to_string(),
        estimated_credits: estimate_cost(provider, &request.payload),
    }))
}
