//! Provider error types.
//!
//! Errors are classified here, at the adapter boundary, and carried upward
//! as-is: retry decisions are owned by the queue's retry policy, never by
//! the adapters themselves.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use thiserror::Error;

use vgen_models::{FailureKind, JobFailure, Provider};

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Content policy rejection: {0}")]
    ContentPolicy(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl ProviderError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// A response that parsed as HTTP but whose body does not match the
    /// provider's documented shape. Classified as unavailable rather than
    /// propagated as a missing value.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Unavailable(format!("malformed provider response: {}", msg.into()))
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ProviderError::InvalidRequest(_) => FailureKind::Validation,
            ProviderError::Auth(_) => FailureKind::Auth,
            ProviderError::ContentPolicy(_) => FailureKind::Policy,
            ProviderError::RateLimited { .. } => FailureKind::RateLimited,
            ProviderError::Unavailable(_) => FailureKind::ProviderUnavailable,
            ProviderError::Network(_) => FailureKind::Network,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Convert to the uniform classified failure reported to the queue.
    pub fn into_failure(self, provider: Provider) -> JobFailure {
        let retry_after = self.retry_after();
        let failure = JobFailure::new(self.failure_kind(), self.to_string()).with_provider(provider);
        match retry_after {
            Some(d) => failure.with_retry_after(d),
            None => failure,
        }
    }
}

/// Parse a `Retry-After` header expressed in seconds.
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Map an HTTP error status to a classified provider error.
///
/// Adapters call this for any non-2xx response after extracting whatever
/// error detail the provider's body carries.
pub(crate) fn classify_status(status: StatusCode, headers: &HeaderMap, detail: String) -> ProviderError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            ProviderError::InvalidRequest(detail)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth(detail),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
            message: detail,
            retry_after: parse_retry_after(headers),
        },
        s if s.is_server_error() => ProviderError::Unavailable(detail),
        s => ProviderError::Unavailable(format!("unexpected status {s}: {detail}")),
    }
}
