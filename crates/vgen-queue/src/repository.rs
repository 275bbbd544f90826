//! The persistence collaborator.
//!
//! The orchestration core does not own durable job history; it feeds an
//! external repository through this narrow interface. Deployments back it
//! with whatever store the application layer uses.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use vgen_models::{Job, JobId, JobState};

use crate::events::{EventSink, JobEvent};

/// Partial update applied to a persisted job record.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub state: Option<JobState>,
    pub provider_job_id: Option<String>,
    pub result_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub error_message: Option<String>,
    pub attempts: Option<u32>,
    pub progress: Option<u8>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobUpdate {
    /// Build the update corresponding to a job snapshot.
    pub fn from_snapshot(job: &Job) -> Self {
        Self {
            state: Some(job.state),
            provider_job_id: job.provider_job_id.clone(),
            result_url: job.result_url.clone(),
            thumbnail_url: job.thumbnail_url.clone(),
            error_message: job.error_message.clone(),
            attempts: Some(job.attempts),
            progress: Some(job.progress),
            completed_at: job.completed_at,
        }
    }
}

/// Persists job records and their status transitions.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create(&self, job: &Job) -> anyhow::Result<()>;
    async fn update(&self, id: &JobId, update: JobUpdate) -> anyhow::Result<()>;
    async fn get(&self, id: &JobId) -> anyhow::Result<Option<Job>>;
}

/// In-memory repository for tests and local development.
#[derive(Default)]
pub struct InMemoryJobRepository {
    records: Mutex<HashMap<JobId, Job>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("repository lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, job: &Job) -> anyhow::Result<()> {
        self.records
            .lock()
            .expect("repository lock poisoned")
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn update(&self, id: &JobId, update: JobUpdate) -> anyhow::Result<()> {
        let mut records = self.records.lock().expect("repository lock poisoned");
        let Some(record) = records.get_mut(id) else {
            anyhow::bail!("job {id} not found in repository");
        };
        if let Some(state) = update.state {
            record.state = state;
        }
        if let Some(provider_job_id) = update.provider_job_id {
            record.provider_job_id = Some(provider_job_id);
        }
        if let Some(result_url) = update.result_url {
            record.result_url = Some(result_url);
        }
        if let Some(thumbnail_url) = update.thumbnail_url {
            record.thumbnail_url = Some(thumbnail_url);
        }
        if let Some(error_message) = update.error_message {
            record.error_message = Some(error_message);
        }
        if let Some(attempts) = update.attempts {
            record.attempts = attempts;
        }
        if let Some(progress) = update.progress {
            record.progress = progress;
        }
        if let Some(completed_at) = update.completed_at {
            record.completed_at = Some(completed_at);
        }
        Ok(())
    }

    async fn get(&self, id: &JobId) -> anyhow::Result<Option<Job>> {
        Ok(self
            .records
            .lock()
            .expect("repository lock poisoned")
            .get(id)
            .cloned())
    }
}

/// Event sink that mirrors queue transitions into a `JobRepository`.
pub struct RepositorySink {
    repository: Arc<dyn JobRepository>,
}

impl RepositorySink {
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl EventSink for RepositorySink {
    async fn on_event(&self, event: &JobEvent) {
        let job = event.job();
        let result = match event {
            JobEvent::Created(job) => self.repository.create(job).await,
            _ => {
                self.repository
                    .update(&job.id, JobUpdate::from_snapshot(job))
                    .await
            }
        };
        if let Err(e) = result {
            warn!(job_id = %job.id, event = event.name(), "Repository sink failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgen_models::{GenerationRequest, JobOptions, Provider};

    fn job(id: &str) -> Job {
        Job::new(
            JobId::from_string(id),
            Provider::Luma,
            GenerationRequest::new("sunset timelapse", 5),
            JobOptions::default(),
        )
    }

    #[tokio::test]
    async fn sink_mirrors_create_and_update() {
        let repository = Arc::new(InMemoryJobRepository::new());
        let sink = RepositorySink::new(repository.clone());

        let mut j = job("job-1");
        sink.on_event(&JobEvent::Created(j.clone())).await;
        assert_eq!(repository.len(), 1);

        j.begin_attempt(Utc::now());
        j.complete("https://storage/job-1.mp4", None, Utc::now());
        sink.on_event(&JobEvent::Completed(j.clone())).await;

        let stored = repository.get(&j.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Completed);
        assert_eq!(stored.result_url.as_deref(), Some("https://storage/job-1.mp4"));
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn update_for_missing_record_errors() {
        let repository = InMemoryJobRepository::new();
        let err = repository
            .update(&JobId::from_string("ghost"), JobUpdate::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
