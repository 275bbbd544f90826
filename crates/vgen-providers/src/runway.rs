//! Runway adapter.
//!
//! Talks to the Runway task API: one POST to create a generation task, then
//! idempotent GETs against the task resource until it settles.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use vgen_models::{AspectRatio, FailureKind, GenerationRequest, Provider};

use crate::adapter::{PollStatus, ProviderAdapter};
use crate::error::{classify_status, ProviderError, ProviderResult};

const API_VERSION: &str = "2024-11-06";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Runway client configuration.
#[derive(Debug, Clone)]
pub struct RunwayConfig {
    /// API key (Bearer token)
    pub api_key: String,
    /// API base URL
    pub base_url: String,
    /// Model identifier
    pub model: String,
}

impl RunwayConfig {
    /// Create config from environment variables.
    pub fn from_env() -> ProviderResult<Self> {
        Ok(Self {
            api_key: std::env::var("RUNWAY_API_KEY")
                .map_err(|_| ProviderError::auth("RUNWAY_API_KEY not set"))?,
            base_url: std::env::var("RUNWAY_BASE_URL")
                .unwrap_or_else(|_| "https://api.runwayml.com".to_string()),
            model: std::env::var("RUNWAY_MODEL").unwrap_or_else(|_| "gen3a_turbo".to_string()),
        })
    }
}

/// Runway provider adapter.
pub struct RunwayAdapter {
    config: RunwayConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct CreateTaskRequest<'a> {
    #[serde(rename = "promptText")]
    prompt_text: &'a str,
    model: &'a str,
    duration: u32,
    ratio: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u32>,
    watermark: bool,
}

#[derive(Debug, Deserialize)]
struct CreateTaskResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    status: String,
    #[serde(default)]
    progress: Option<f32>,
    #[serde(default)]
    output: Option<Vec<String>>,
    #[serde(default)]
    failure: Option<String>,
    #[serde(default, rename = "failureCode")]
    failure_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

fn ratio_for(aspect: AspectRatio) -> &'static str {
    match aspect {
        AspectRatio::Landscape => "1280:768",
        AspectRatio::Portrait => "768:1280",
        AspectRatio::Square => "960:960",
    }
}

impl RunwayAdapter {
    /// Create a new Runway adapter.
    pub fn new(config: RunwayConfig) -> ProviderResult<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { config, client })
    }

    /// Create from environment variables.
    pub fn from_env() -> ProviderResult<Self> {
        Self::new(RunwayConfig::from_env()?)
    }

    /// Extract an error detail from a non-2xx response and classify it.
    async fn error_from_response(resp: reqwest::Response) -> ProviderError {
        let status = resp.status();
        let headers = resp.headers().clone();
        let detail = match resp.text().await {
            Ok(body) => serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(|e| e.error)
                .unwrap_or(body),
            Err(e) => e.to_string(),
        };
        classify_status(status, &headers, detail)
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for RunwayAdapter {
    fn provider(&self) -> Provider {
        Provider::Runway
    }

    async fn submit(&self, request: &GenerationRequest) -> ProviderResult<String> {
        let body = CreateTaskRequest {
            prompt_text: &request.prompt,
            model: &self.config.model,
            duration: request.duration_secs,
            ratio: ratio_for(request.aspect_ratio),
            seed: request.seed,
            watermark: false,
        };

        let resp = self
            .client
            .post(format!("{}/v1/text_to_video", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .header("X-Runway-Version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }

        let created: CreateTaskResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::malformed(e.to_string()))?;

        debug!(task_id = %created.id, "Runway task created");
        Ok(created.id)
    }

    async fn poll_status(&self, provider_job_id: &str) -> ProviderResult<PollStatus> {
        let resp = self
            .client
            .get(format!("{}/v1/tasks/{}", self.config.base_url, provider_job_id))
            .bearer_auth(&self.config.api_key)
            .header("X-Runway-Version", API_VERSION)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }

        let task: TaskResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::malformed(e.to_string()))?;

        match task.status.as_str() {
            "PENDING" | "THROTTLED" | "RUNNING" => Ok(PollStatus::Running {
                progress: task.progress,
            }),
            "SUCCEEDED" => match task.output.unwrap_or_default().into_iter().next() {
                Some(result_url) => Ok(PollStatus::Completed {
                    result_url,
                    thumbnail_url: None,
                }),
                // Succeeded without an output URL yet: treat as still
                // rendering rather than surfacing a hole downstream.
                None => Ok(PollStatus::Running { progress: task.progress }),
            },
            "FAILED" => {
                let message = task
                    .failure
                    .or(task.failure_code.clone())
                    .unwrap_or_else(|| "generation failed".to_string());
                let kind = match &task.failure_code {
                    Some(code) if code.starts_with("SAFETY") => FailureKind::Policy,
                    _ => FailureKind::ProviderUnavailable,
                };
                Ok(PollStatus::Failed { kind, message })
            }
            other => Err(ProviderError::malformed(format!("unknown task status: {other}"))),
        }
    }

    async fn validate_credentials(&self) -> ProviderResult<()> {
        let resp = self
            .client
            .get(format!("{}/v1/organization", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .header("X-Runway-Version", API_VERSION)
            .send()
            .await?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from_response(resp).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn adapter(server: &MockServer) -> RunwayAdapter {
        RunwayAdapter::new(RunwayConfig {
            api_key: "rw-key".to_string(),
            base_url: server.uri(),
            model: "gen3a_turbo".to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn submit_returns_task_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/text_to_video"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "task-1"})))
            .mount(&server)
            .await;

        let id = adapter(&server)
            .await
            .submit(&GenerationRequest::new("a fox", 8))
            .await
            .unwrap();
        assert_eq!(id, "task-1");
    }

    #[tokio::test]
    async fn submit_rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/text_to_video"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "9")
                    .set_body_json(json!({"error": "too many concurrent tasks"})),
            )
            .mount(&server)
            .await;

        let err = adapter(&server)
            .await
            .submit(&GenerationRequest::new("a fox", 8))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { .. }));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(9)));
    }

    #[tokio::test]
    async fn poll_succeeded_yields_completed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/tasks/task-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "SUCCEEDED",
                "output": ["https://cdn.runway/out.mp4"],
            })))
            .mount(&server)
            .await;

        let status = adapter(&server).await.poll_status("task-1").await.unwrap();
        assert_eq!(
            status,
            PollStatus::Completed {
                result_url: "https://cdn.runway/out.mp4".to_string(),
                thumbnail_url: None,
            }
        );
    }

    #[tokio::test]
    async fn poll_succeeded_without_output_keeps_running() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/tasks/task-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "SUCCEEDED", "output": []})),
            )
            .mount(&server)
            .await;

        let status = adapter(&server).await.poll_status("task-1").await.unwrap();
        assert!(matches!(status, PollStatus::Running { .. }));
    }

    #[tokio::test]
    async fn poll_safety_failure_is_policy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/tasks/task-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "FAILED",
                "failure": "Input text flagged by safety filters",
                "failureCode": "SAFETY.INPUT.TEXT",
            })))
            .mount(&server)
            .await;

        let status = adapter(&server).await.poll_status("task-1").await.unwrap();
        match status {
            PollStatus::Failed { kind, message } => {
                assert_eq!(kind, FailureKind::Policy);
                assert_eq!(message, "Input text flagged by safety filters");
            }
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[tokio::test]
    async fn poll_unknown_status_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/tasks/task-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "WEIRD"})))
            .mount(&server)
            .await;

        let err = adapter(&server).await.poll_status("task-1").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[tokio::test]
    async fn validate_credentials_maps_401_to_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/organization"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"error": "invalid api key"})),
            )
            .mount(&server)
            .await;

        let err = adapter(&server).await.validate_credentials().await.unwrap_err();
        assert!(matches!(err, ProviderError::Auth(_)));
    }
}
