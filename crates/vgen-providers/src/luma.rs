//! Luma Dream Machine adapter.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use vgen_models::{FailureKind, GenerationRequest, Provider};

use crate::adapter::{PollStatus, ProviderAdapter};
use crate::error::{classify_status, ProviderError, ProviderResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Luma client configuration.
#[derive(Debug, Clone)]
pub struct LumaConfig {
    /// API key (Bearer token)
    pub api_key: String,
    /// API base URL
    pub base_url: String,
    /// Model identifier
    pub model: String,
}

impl LumaConfig {
    /// Create config from environment variables.
    pub fn from_env() -> ProviderResult<Self> {
        Ok(Self {
            api_key: std::env::var("LUMA_API_KEY")
                .map_err(|_| ProviderError::auth("LUMA_API_KEY not set"))?,
            base_url: std::env::var("LUMA_BASE_URL")
                .unwrap_or_else(|_| "https://api.lumalabs.ai".to_string()),
            model: std::env::var("LUMA_MODEL").unwrap_or_else(|_| "ray-2".to_string()),
        })
    }
}

/// Luma provider adapter.
pub struct LumaAdapter {
    config: LumaConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct CreateGenerationRequest<'a> {
    prompt: &'a str,
    model: &'a str,
    resolution: &'a str,
    duration: String,
    aspect_ratio: &'a str,
    #[serde(rename = "loop")]
    looping: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    keyframes: Option<Keyframes<'a>>,
}

#[derive(Debug, Serialize)]
struct Keyframes<'a> {
    frame0: Keyframe<'a>,
}

#[derive(Debug, Serialize)]
struct Keyframe<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct Generation {
    id: String,
    state: String,
    #[serde(default)]
    failure_reason: Option<String>,
    #[serde(default)]
    assets: Option<Assets>,
}

#[derive(Debug, Deserialize)]
struct Assets {
    #[serde(default)]
    video: Option<String>,
    #[serde(default)]
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

impl LumaAdapter {
    /// Create a new Luma adapter.
    pub fn new(config: LumaConfig) -> ProviderResult<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { config, client })
    }

    /// Create from environment variables.
    pub fn from_env() -> ProviderResult<Self> {
        Self::new(LumaConfig::from_env()?)
    }

    fn generations_url(&self) -> String {
        format!("{}/dream-machine/v1/generations", self.config.base_url)
    }

    async fn error_from_response(resp: reqwest::Response) -> ProviderError {
        let status = resp.status();
        let headers = resp.headers().clone();
        let detail = match resp.text().await {
            Ok(body) => serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(|e| e.detail)
                .unwrap_or(body),
            Err(e) => e.to_string(),
        };
        classify_status(status, &headers, detail)
    }

    fn status_from_generation(generation: Generation) -> ProviderResult<PollStatus> {
        match generation.state.as_str() {
            "queued" | "dreaming" => Ok(PollStatus::Running { progress: None }),
            "completed" => {
                let assets = generation.assets.unwrap_or(Assets { video: None, image: None });
                match assets.video {
                    Some(result_url) => Ok(PollStatus::Completed {
                        result_url,
                        thumbnail_url: assets.image,
                    }),
                    // Completed without a video asset yet: keep polling.
                    None => Ok(PollStatus::Running { progress: None }),
                }
            }
            "failed" => {
                let message = generation
                    .failure_reason
                    .unwrap_or_else(|| "generation failed".to_string());
                let kind = if message.to_lowercase().contains("moderation") {
                    FailureKind::Policy
                } else {
                    FailureKind::ProviderUnavailable
                };
                Ok(PollStatus::Failed { kind, message })
            }
            other => Err(ProviderError::malformed(format!("unknown generation state: {other}"))),
        }
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for LumaAdapter {
    fn provider(&self) -> Provider {
        Provider::Luma
    }

    async fn submit(&self, request: &GenerationRequest) -> ProviderResult<String> {
        let keyframes = request.init_image_url.as_deref().map(|url| Keyframes {
            frame0: Keyframe { kind: "image", url },
        });

        let body = CreateGenerationRequest {
            prompt: &request.prompt,
            model: &self.config.model,
            resolution: request.resolution.as_str(),
            duration: format!("{}s", request.duration_secs),
            aspect_ratio: request.aspect_ratio.as_str(),
            looping: false,
            keyframes,
        };

        let resp = self
            .client
            .post(self.generations_url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }

        let generation: Generation = resp
            .json()
            .await
            .map_err(|e| ProviderError::malformed(e.to_string()))?;

        debug!(generation_id = %generation.id, state = %generation.state, "Luma generation created");
        Ok(generation.id)
    }

    async fn poll_status(&self, provider_job_id: &str) -> ProviderResult<PollStatus> {
        let resp = self
            .client
            .get(format!("{}/{}", self.generations_url(), provider_job_id))
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }

        let generation: Generation = resp
            .json()
            .await
            .map_err(|e| ProviderError::malformed(e.to_string()))?;

        Self::status_from_generation(generation)
    }

    async fn validate_credentials(&self) -> ProviderResult<()> {
        let resp = self
            .client
            .get(format!("{}/dream-machine/v1/credits", self.config.base_url))
            .bearer_auth(&self.config.api_key)
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
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn adapter(server: &MockServer) -> LumaAdapter {
        LumaAdapter::new(LumaConfig {
            api_key: "luma-key".to_string(),
            base_url: server.uri(),
            model: "ray-2".to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn submit_sends_bearer_token_and_returns_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/dream-machine/v1/generations"))
            .and(header("authorization", "Bearer luma-key"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"id": "gen-7", "state": "queued"})),
            )
            .mount(&server)
            .await;

        let id = adapter(&server)
            .await
            .submit(&GenerationRequest::new("city at dusk", 5))
            .await
            .unwrap();
        assert_eq!(id, "gen-7");
    }

    #[tokio::test]
    async fn poll_completed_maps_assets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dream-machine/v1/generations/gen-7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "gen-7",
                "state": "completed",
                "assets": {"video": "https://cdn.luma/out.mp4", "image": "https://cdn.luma/thumb.jpg"},
            })))
            .mount(&server)
            .await;

        let status = adapter(&server).await.poll_status("gen-7").await.unwrap();
        assert_eq!(
            status,
            PollStatus::Completed {
                result_url: "https://cdn.luma/out.mp4".to_string(),
                thumbnail_url: Some("https://cdn.luma/thumb.jpg".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn poll_completed_without_video_keeps_running() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dream-machine/v1/generations/gen-7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "gen-7",
                "state": "completed",
                "assets": {},
            })))
            .mount(&server)
            .await;

        let status = adapter(&server).await.poll_status("gen-7").await.unwrap();
        assert!(matches!(status, PollStatus::Running { .. }));
    }

    #[tokio::test]
    async fn poll_moderation_failure_is_policy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dream-machine/v1/generations/gen-7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "gen-7",
                "state": "failed",
                "failure_reason": "prompt rejected by moderation",
            })))
            .mount(&server)
            .await;

        let status = adapter(&server).await.poll_status("gen-7").await.unwrap();
        match status {
            PollStatus::Failed { kind, message } => {
                assert_eq!(kind, FailureKind::Policy);
                assert_eq!(message, "prompt rejected by moderation");
            }
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dream-machine/v1/generations/gen-7"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({"detail": "maintenance"})))
            .mount(&server)
            .await;

        let err = adapter(&server).await.poll_status("gen-7").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }
}
