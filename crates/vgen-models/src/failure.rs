//! Classified job failures.
//!
//! Every error that reaches the queue has been classified at the boundary
//! where it occurred (provider adapter, download, upload, worker). The
//! classification drives the retry decision; the message is kept verbatim
//! for diagnostics.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Provider;

/// Failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Malformed payload or unsupported parameters
    Validation,
    /// Invalid credentials or unverified account
    Auth,
    /// Content safety / policy rejection
    Policy,
    /// Provider throttling
    RateLimited,
    /// Provider 5xx, malformed response, or temporary outage
    ProviderUnavailable,
    /// Network-level failure talking to an external service
    Network,
    /// Provider-side generation did not finish within the poll budget
    PollTimeout,
    /// Fetching the rendered asset failed
    Download,
    /// Pushing the asset to storage failed
    Upload,
    /// Unexpected worker-side error
    Internal,
}

impl FailureKind {
    /// Whether a failure of this kind may succeed on a fresh attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FailureKind::Validation | FailureKind::Auth | FailureKind::Policy => false,
            FailureKind::RateLimited
            | FailureKind::ProviderUnavailable
            | FailureKind::Network
            | FailureKind::PollTimeout
            | FailureKind::Download
            | FailureKind::Upload
            | FailureKind::Internal => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::Auth => "auth",
            FailureKind::Policy => "policy",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::ProviderUnavailable => "provider_unavailable",
            FailureKind::Network => "network",
            FailureKind::PollTimeout => "poll_timeout",
            FailureKind::Download => "download",
            FailureKind::Upload => "upload",
            FailureKind::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A classified failure reported to the queue at the end of an attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFailure {
    /// Failure classification
    pub kind: FailureKind,
    /// Original error message, kept verbatim
    pub message: String,
    /// Provider the job was running against, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    /// Provider-supplied retry-after hint in milliseconds, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider: None,
            retry_after_ms: None,
        }
    }

    /// Attach the provider the failure originated from.
    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Attach a provider-supplied retry-after hint.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_ms.map(Duration::from_millis)
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.provider {
            Some(p) => write!(f, "[{}/{}] {}", p, self.kind, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}
