//! Moving rendered assets from provider CDNs into durable storage.
//!
//! Provider result URLs are short-lived; completion is only final once the
//! bytes are under our own key. Download and upload failures are classified
//! as retryable independently of provider-side generation success.

use reqwest::Client;
use tracing::debug;

use vgen_models::Job;
use vgen_storage::{StorageUploader, UploadParams};

use crate::error::{WorkerError, WorkerResult};

/// Fetch the raw bytes behind a provider-returned URL.
pub async fn fetch_asset(client: &Client, url: &str) -> WorkerResult<Vec<u8>> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| WorkerError::download(format!("GET {url}: {e}")))?;

    if !resp.status().is_success() {
        return Err(WorkerError::download(format!(
            "GET {url}: status {}",
            resp.status()
        )));
    }

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| WorkerError::download(format!("reading body of {url}: {e}")))?;

    debug!(url, size = bytes.len(), "Fetched rendered asset");
    Ok(bytes.to_vec())
}

/// Mirror the rendered video into storage, returning its durable URL.
pub async fn store_result(
    client: &Client,
    uploader: &dyn StorageUploader,
    job: &Job,
    prefix: &str,
    provider_url: &str,
) -> WorkerResult<String> {
    let bytes = fetch_asset(client, provider_url).await?;
    let key = format!("{}/{}.mp4", prefix, job.id);
    let url = uploader
        .upload(bytes, UploadParams::new(key, "video/mp4"))
        .await?;
    Ok(url)
}

/// Mirror the thumbnail when the provider produced one.
///
/// Best-effort: the clip is the deliverable, a lost thumbnail is logged by
/// the caller and does not fail the job.
pub async fn store_thumbnail(
    client: &Client,
    uploader: &dyn StorageUploader,
    job: &Job,
    prefix: &str,
    provider_url: &str,
) -> WorkerResult<String> {
    let bytes = fetch_asset(client, provider_url).await?;
    let key = format!("{}/{}.jpg", prefix, job.id);
    let url = uploader
        .upload(bytes, UploadParams::new(key, "image/jpeg"))
        .await?;
    Ok(url)
}
