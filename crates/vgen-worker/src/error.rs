//! Worker error types and failure classification.

use thiserror::Error;

use vgen_models::{FailureKind, JobFailure, Provider};
use vgen_providers::ProviderError;
use vgen_queue::QueueError;
use vgen_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Generation failed: {message}")]
    Generation { kind: FailureKind, message: String },

    #[error("Polling timed out after {polls} polls")]
    PollTimeout { polls: u32 },

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkerError {
    pub fn download(msg: impl Into<String>) -> Self {
        Self::Download(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Convert into the uniform classified failure reported to the queue.
    ///
    /// Every error path ends here; nothing is dropped and the message is
    /// carried verbatim.
    pub fn into_failure(self, provider: Provider) -> JobFailure {
        match self {
            WorkerError::Provider(e) => e.into_failure(provider),
            WorkerError::Generation { kind, message } => {
                JobFailure::new(kind, message).with_provider(provider)
            }
            WorkerError::PollTimeout { polls } => JobFailure::new(
                FailureKind::PollTimeout,
                format!("generation timed out after {polls} status polls"),
            )
            .with_provider(provider),
            WorkerError::Download(message) => {
                JobFailure::new(FailureKind::Download, message).with_provider(provider)
            }
            WorkerError::Storage(e) => {
                JobFailure::new(FailureKind::Upload, e.to_string()).with_provider(provider)
            }
            WorkerError::Config(message) => JobFailure::new(FailureKind::Validation, message),
            WorkerError::Queue(e) => JobFailure::new(FailureKind::Internal, e.to_string()),
            WorkerError::Internal(message) => JobFailure::new(FailureKind::Internal, message),
        }
    }
}
