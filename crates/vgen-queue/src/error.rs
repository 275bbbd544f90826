//! Queue error types.

use thiserror::Error;

use vgen_models::{JobId, JobState};

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Invalid state for {id}: {state} ({operation})")]
    InvalidState {
        id: JobId,
        state: JobState,
        operation: &'static str,
    },

    #[error("Attempts exhausted for {id}: {attempts}/{max_attempts}")]
    AttemptsExhausted {
        id: JobId,
        attempts: u32,
        max_attempts: u32,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_state(id: JobId, state: JobState, operation: &'static str) -> Self {
        Self::InvalidState { id, state, operation }
    }
}
