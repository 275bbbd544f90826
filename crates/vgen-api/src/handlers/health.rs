//! Health check handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint (liveness probe).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub healthy: bool,
    pub queue_reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_latency_ms: Option<u64>,
    pub active_worker_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Readiness check endpoint: queue reachability plus live worker count.
pub async fn ready(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    use std::time::Instant;

    let start = Instant::now();
    let (queue_reachable, queue_latency_ms, error) = match state.queue.ping().await {
        Ok(()) => (true, Some(start.elapsed().as_millis() as u64), None),
        Err(e) => (false, None, Some(e.to_string())),
    };

    let active_worker_count = if queue_reachable {
        state.queue.active_workers().await.unwrap_or(0)
    } else {
        0
    };

    let response = ReadinessResponse {
        healthy: queue_reachable,
        queue_reachable,
        queue_latency_ms,
        active_worker_count,
        error,
    };

    if response.healthy {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}
