//! Artifact storage for rendered videos.
//!
//! This crate provides:
//! - The `StorageUploader` collaborator contract (bytes in, durable URL out)
//! - A Cloudflare R2 implementation over the S3 API
//! - An in-memory implementation for tests and local development

pub mod client;
pub mod error;
pub mod uploader;

pub use client::{R2Config, R2Uploader};
pub use error::{StorageError, StorageResult};
pub use uploader::{MemoryUploader, StorageUploader, UploadParams};
