//! Shared data models for the VidGen backend.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, their lifecycle state and per-job options
//! - The supported rendering providers
//! - Generation request payloads
//! - Classified job failures

pub mod failure;
pub mod job;
pub mod provider;
pub mod request;

// Re-export common types
pub use failure::{FailureKind, JobFailure};
pub use job::{Job, JobId, JobOptions, JobState};
pub use provider::{Provider, UnknownProvider};
pub use request::{AspectRatio, GenerationRequest, Resolution};
