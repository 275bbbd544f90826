//! API routes.

use axum::routing::{delete, get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::admin::{clean_jobs, queue_overview};
use crate::handlers::health::{health, ready};
use crate::handlers::jobs::{cancel_job, enqueue_job, estimate_job_cost, get_job_status, retry_job};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let api_routes = Router::new()
        .route("/jobs", post(enqueue_job))
        .route("/jobs/:job_id", get(get_job_status))
        .route("/jobs/:job_id", delete(cancel_job))
        .route("/jobs/:job_id/retry", post(retry_job))
        .route("/estimate", post(estimate_job_cost))
        .route("/admin/queue", get(queue_overview))
        .route("/admin/clean", post(clean_jobs));

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .nest("/api", api_routes);

    if let Some(handle) = metrics_handle {
        router = router.route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use vgen_queue::{InMemoryJobQueue, ManualClock, QueueConfig};

    use crate::config::ApiConfig;

    fn app() -> Router {
        let queue = Arc::new(InMemoryJobQueue::new(
            QueueConfig::default(),
            Arc::new(ManualClock::new()),
            Vec::new(),
        ));
        create_router(AppState::with_queue(ApiConfig::default(), queue), None)
    }

    fn enqueue_body(id: &str) -> String {
        format!(
            r#"{{"id":"{id}","provider":"runway","payload":{{"prompt":"a fox","duration_secs":8}}}}"#
        )
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn post_json(uri: &str, body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_over_http() {
        let app = app();

        let (status, body) = send(&app, post_json("/api/jobs", enqueue_body("job-1"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["duplicate"], false);
        assert_eq!(body["job_id"], "job-1");

        let (status, body) = send(&app, post_json("/api/jobs", enqueue_body("job-1"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["duplicate"], true);
    }

    #[tokio::test]
    async fn invalid_payload_is_rejected() {
        let app = app();
        let body = r#"{"id":"job-1","provider":"runway","payload":{"prompt":"","duration_secs":8}}"#;
        let (status, _) = send(&app, post_json("/api/jobs", body.to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected() {
        let app = app();
        let body = r#"{"id":"job-1","provider":"pika","payload":{"prompt":"a fox","duration_secs":8}}"#;
        let (status, _) = send(&app, post_json("/api/jobs", body.to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn status_cancel_and_missing_job_contracts() {
        let app = app();
        send(&app, post_json("/api/jobs", enqueue_body("job-1"))).await;

        let (status, body) = send(
            &app,
            Request::builder()
                .uri("/api/jobs/job-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["progress"], 0);

        let (status, body) = send(
            &app,
            Request::builder()
                .method("DELETE")
                .uri("/api/jobs/job-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cancelled"], true);

        let (status, _) = send(
            &app,
            Request::builder()
                .uri("/api/jobs/job-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn admin_overview_reports_counts() {
        let app = app();
        send(&app, post_json("/api/jobs", enqueue_body("job-1"))).await;
        send(&app, post_json("/api/jobs", enqueue_body("job-2"))).await;

        let (status, body) = send(
            &app,
            Request::builder()
                .uri("/api/admin/queue")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["counts"]["waiting"], 2);
        assert_eq!(body["recent_failures"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn health_and_ready_probes() {
        let app = app();

        let (status, _) = send(
            &app,
            Request::builder().uri("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app,
            Request::builder().uri("/ready").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["queue_reachable"], true);
        assert_eq!(body["active_worker_count"], 0);
    }

    #[tokio::test]
    async fn estimate_is_pure_and_requires_no_backend() {
        let app = app();
        let body = r#"{"provider":"luma","payload":{"prompt":"a fox","duration_secs":10}}"#;
        let (status, response) = send(&app, post_json("/api/estimate", body.to_string())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["estimated_credits"], 40);
    }
}
