//! The storage uploader contract.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};

/// Metadata accompanying an upload.
#[derive(Debug, Clone)]
pub struct UploadParams {
    /// Object key, e.g. `results/job-1.mp4`
    pub key: String,
    /// MIME type of the payload
    pub content_type: String,
}

impl UploadParams {
    pub fn new(key: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            content_type: content_type.into(),
        }
    }
}

/// Accepts raw bytes and returns a durable URL.
///
/// The orchestration core depends only on this narrow interface; the backing
/// store (R2, S3, local disk) is a deployment decision.
#[async_trait]
pub trait StorageUploader: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, params: UploadParams) -> StorageResult<String>;
}

/// In-memory uploader for tests and local development.
///
/// Returned URLs use the `memory://` scheme and the stored bytes can be
/// inspected after the fact.
#[derive(Default)]
pub struct MemoryUploader {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryUploader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a stored object by key.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .expect("uploader lock poisoned")
            .get(key)
            .map(|(bytes, _)| bytes.clone())
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.lock().expect("uploader lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StorageUploader for MemoryUploader {
    async fn upload(&self, bytes: Vec<u8>, params: UploadParams) -> StorageResult<String> {
        if params.key.is_empty() || params.key.starts_with('/') {
            return Err(StorageError::invalid_key(params.key));
        }
        let url = format!("memory://{}", params.key);
        self.objects
            .lock()
            .expect("uploader lock poisoned")
            .insert(params.key, (bytes, params.content_type));
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_uploader_stores_and_returns_url() {
        let uploader = MemoryUploader::new();
        let url = uploader
            .upload(
                b"fake video".to_vec(),
                UploadParams::new("results/job-1.mp4", "video/mp4"),
            )
            .await
            .unwrap();

        assert_eq!(url, "memory://results/job-1.mp4");
        assert_eq!(uploader.get("results/job-1.mp4").unwrap(), b"fake video");
    }

    #[tokio::test]
    async fn memory_uploader_rejects_bad_keys() {
        let uploader = MemoryUploader::new();
        let err = uploader
            .upload(vec![], UploadParams::new("/absolute", "video/mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }
}
