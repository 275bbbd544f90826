//! In-memory queue implementation.
//!
//! Single-process implementation backing tests and local development. All
//! time reads go through the injected `Clock`, so retry backoff, delayed
//! dispatch and retention are fully deterministic under a `ManualClock`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use vgen_models::{Job, JobFailure, JobId, JobState};

use crate::clock::Clock;
use crate::error::{QueueError, QueueResult};
use crate::events::{EventSink, JobEvent};
use crate::queue::{
    CancelOutcome, EnqueueOptions, EnqueueOutcome, FailureDisposition, FailureSample, JobQueue,
    LeasedJob, NewJob, QueueConfig, StatusCounts,
};
use crate::retry::{RetryDecision, RetryPolicy};

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<JobId, Job>,
    /// Dispatch order for jobs eligible now.
    ready: VecDeque<JobId>,
    /// Jobs scheduled in the future (retry backoff).
    delayed: Vec<JobId>,
    /// Current lease holder per claimed job.
    owners: HashMap<JobId, String>,
    /// Ring of recent terminal failures, newest at the front.
    failures: VecDeque<FailureSample>,
    /// Last heartbeat per consumer.
    workers: HashMap<String, DateTime<Utc>>,
}

/// In-memory `JobQueue` driven by an explicit clock.
pub struct InMemoryJobQueue {
    state: Mutex<MemoryState>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
    policy: RetryPolicy,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl InMemoryJobQueue {
    pub fn new(config: QueueConfig, clock: Arc<dyn Clock>, sinks: Vec<Arc<dyn EventSink>>) -> Self {
        let policy = RetryPolicy::new(config.base_delay, config.cap_delay, config.max_jitter);
        Self {
            state: Mutex::new(MemoryState::default()),
            clock,
            config,
            policy,
            sinks,
        }
    }

    async fn emit(&self, event: JobEvent) {
        for sink in &self.sinks {
            sink.on_event(&event).await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("queue lock poisoned")
    }

    /// Move due delayed jobs into the ready queue.
    fn promote_due(state: &mut MemoryState, now: DateTime<Utc>) {
        let mut still_delayed = Vec::new();
        for id in state.delayed.drain(..) {
            match state.jobs.get(&id) {
                Some(job) if job.is_due(now) => state.ready.push_back(id),
                Some(_) => still_delayed.push(id),
                None => {}
            }
        }
        state.delayed = still_delayed;
    }

    fn push_failure(state: &mut MemoryState, sample: FailureSample, cap: usize) {
        state.failures.push_front(sample);
        state.failures.truncate(cap);
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, new: NewJob, options: EnqueueOptions) -> QueueResult<EnqueueOutcome> {
        let now = self.clock.now();
        let event;
        let outcome = {
            let mut state = self.lock();
            if let Some(existing) = state.jobs.get(&new.id) {
                debug!(job_id = %new.id, "Duplicate enqueue, returning existing job");
                return Ok(EnqueueOutcome::Duplicate(existing.clone()));
            }

            let mut job = Job::new(new.id, new.provider, new.request, options.resolve(&self.config));
            job.run_at = now;
            state.jobs.insert(job.id.clone(), job.clone());
            state.ready.push_back(job.id.clone());
            event = JobEvent::Created(job.clone());
            EnqueueOutcome::Created(job)
        };
        self.emit(event).await;
        Ok(outcome)
    }

    async fn dequeue(&self, consumer: &str) -> QueueResult<Option<LeasedJob>> {
        let now = self.clock.now();
        let mut state = self.lock();
        Self::promote_due(&mut state, now);

        let mut skipped = Vec::new();
        let mut claimed = None;
        while let Some(id) = state.ready.pop_front() {
            let Some(job) = state.jobs.get(&id) else {
                // Cancelled or evicted while queued.
                continue;
            };
            if !job.is_due(now) || state.owners.contains_key(&id) {
                skipped.push(id);
                continue;
            }
            let job = job.clone();
            state.owners.insert(id, consumer.to_string());
            claimed = Some(LeasedJob {
                job,
                lease: Uuid::new_v4().to_string(),
            });
            break;
        }
        // Skipped entries keep their place at the front of the queue.
        for id in skipped.into_iter().rev() {
            state.ready.push_front(id);
        }
        Ok(claimed)
    }

    async fn reclaim(&self, _consumer: &str, _limit: usize) -> QueueResult<Vec<LeasedJob>> {
        // Single-process queue: a crashed owner means a crashed process.
        Ok(Vec::new())
    }

    async fn ack(&self, id: &JobId, _lease: &str) -> QueueResult<()> {
        self.lock().owners.remove(id);
        Ok(())
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<Job>> {
        Ok(self.lock().jobs.get(id).cloned())
    }

    async fn mark_started(&self, id: &JobId) -> QueueResult<Job> {
        let now = self.clock.now();
        let (event, result) = {
            let mut state = self.lock();
            let Some(job) = state.jobs.get_mut(id) else {
                return Err(QueueError::NotFound(id.clone()));
            };
            if job.state.is_terminal() {
                return Err(QueueError::invalid_state(id.clone(), job.state, "mark_started"));
            }
            if !job.has_attempts_left() {
                // Never execute past the attempt budget; fail terminally so
                // the record explains itself.
                let attempts = job.attempts;
                let max_attempts = job.options.max_attempts;
                job.fail("attempt budget exhausted before execution", now);
                let snapshot = job.clone();
                Self::push_failure(
                    &mut state,
                    FailureSample {
                        id: id.clone(),
                        error_message: "attempt budget exhausted before execution".to_string(),
                        attempts,
                        timestamp: now,
                    },
                    self.config.failure_sample_size,
                );
                (
                    Some(JobEvent::Failed(snapshot)),
                    Err(QueueError::AttemptsExhausted {
                        id: id.clone(),
                        attempts,
                        max_attempts,
                    }),
                )
            } else {
                job.begin_attempt(now);
                let snapshot = job.clone();
                (Some(JobEvent::Started(snapshot.clone())), Ok(snapshot))
            }
        };
        if let Some(event) = event {
            self.emit(event).await;
        }
        result
    }

    async fn set_provider_job(&self, id: &JobId, provider_job_id: &str) -> QueueResult<()> {
        let now = self.clock.now();
        let mut state = self.lock();
        let Some(job) = state.jobs.get_mut(id) else {
            return Err(QueueError::NotFound(id.clone()));
        };
        if !job.assign_provider_job(provider_job_id, now) {
            return Err(QueueError::invalid_state(id.clone(), job.state, "set_provider_job"));
        }
        Ok(())
    }

    async fn set_progress(&self, id: &JobId, progress: u8) -> QueueResult<()> {
        let now = self.clock.now();
        let mut state = self.lock();
        let Some(job) = state.jobs.get_mut(id) else {
            return Err(QueueError::NotFound(id.clone()));
        };
        job.set_progress(progress, now);
        Ok(())
    }

    async fn complete(
        &self,
        id: &JobId,
        result_url: &str,
        thumbnail_url: Option<&str>,
    ) -> QueueResult<Job> {
        let now = self.clock.now();
        let (event, snapshot) = {
            let mut state = self.lock();
            let Some(job) = state.jobs.get_mut(id) else {
                return Err(QueueError::NotFound(id.clone()));
            };
            if !job.complete(result_url, thumbnail_url.map(str::to_string), now) {
                return Err(QueueError::invalid_state(id.clone(), job.state, "complete"));
            }
            let snapshot = job.clone();
            (JobEvent::Completed(snapshot.clone()), snapshot)
        };
        self.emit(event).await;
        Ok(snapshot)
    }

    async fn report_failure(&self, id: &JobId, failure: &JobFailure) -> QueueResult<FailureDisposition> {
        let now = self.clock.now();
        let (event, disposition) = {
            let mut state = self.lock();
            let Some(job) = state.jobs.get_mut(id) else {
                return Err(QueueError::NotFound(id.clone()));
            };
            if job.state != JobState::Processing {
                return Err(QueueError::invalid_state(id.clone(), job.state, "report_failure"));
            }

            match self.policy.decide(failure, job.attempts, &job.options) {
                RetryDecision::Retry { delay } => {
                    let run_at = now + chrono::Duration::from_std(delay).unwrap_or_default();
                    job.reschedule(Some(failure.message.clone()), run_at, now);
                    let snapshot = job.clone();
                    let attempts = snapshot.attempts;
                    state.delayed.push(id.clone());
                    (
                        JobEvent::Retried { job: snapshot, delay },
                        FailureDisposition::Retried { delay, attempts },
                    )
                }
                RetryDecision::GiveUp => {
                    job.fail(failure.message.clone(), now);
                    let snapshot = job.clone();
                    Self::push_failure(
                        &mut state,
                        FailureSample {
                            id: id.clone(),
                            error_message: failure.message.clone(),
                            attempts: snapshot.attempts,
                            timestamp: now,
                        },
                        self.config.failure_sample_size,
                    );
                    (
                        JobEvent::Failed(snapshot.clone()),
                        FailureDisposition::Failed { job: snapshot },
                    )
                }
            }
        };
        self.emit(event).await;
        Ok(disposition)
    }

    async fn cancel(&self, id: &JobId) -> QueueResult<CancelOutcome> {
        let event;
        let outcome = {
            let mut state = self.lock();
            let Some(job) = state.jobs.get(id) else {
                return Ok(CancelOutcome::NotFound);
            };
            if state.owners.contains_key(id) || job.state == JobState::Processing {
                return Ok(CancelOutcome::InFlight);
            }
            if job.state.is_terminal() {
                return Ok(CancelOutcome::Terminal);
            }
            let job = state.jobs.remove(id).expect("checked above");
            state.ready.retain(|queued| queued != id);
            state.delayed.retain(|queued| queued != id);
            event = JobEvent::Cancelled(job);
            CancelOutcome::Cancelled
        };
        self.emit(event).await;
        Ok(outcome)
    }

    async fn retry(&self, id: &JobId) -> QueueResult<Job> {
        let now = self.clock.now();
        let (event, snapshot) = {
            let mut state = self.lock();
            let Some(job) = state.jobs.get_mut(id) else {
                return Err(QueueError::NotFound(id.clone()));
            };
            if job.state != JobState::Failed {
                return Err(QueueError::invalid_state(id.clone(), job.state, "retry"));
            }
            if !job.has_attempts_left() {
                return Err(QueueError::AttemptsExhausted {
                    id: id.clone(),
                    attempts: job.attempts,
                    max_attempts: job.options.max_attempts,
                });
            }
            job.reschedule(None, now, now);
            let snapshot = job.clone();
            state.ready.push_back(id.clone());
            (
                JobEvent::Retried {
                    job: snapshot.clone(),
                    delay: Duration::ZERO,
                },
                snapshot,
            )
        };
        self.emit(event).await;
        Ok(snapshot)
    }

    async fn clean(&self, older_than: Duration, states: &[JobState], limit: usize) -> QueueResult<u64> {
        let now = self.clock.now();
        let mut state = self.lock();

        let mut evict = Vec::new();
        for (id, job) in &state.jobs {
            if evict.len() >= limit {
                break;
            }
            if !states.contains(&job.state) || !job.state.is_terminal() {
                continue;
            }
            let Some(finished_at) = job.completed_at else {
                continue;
            };
            let grace = older_than.max(self.config.retention_for(job, job.state));
            let cutoff = now - chrono::Duration::from_std(grace).unwrap_or_default();
            if finished_at <= cutoff {
                evict.push(id.clone());
            }
        }

        for id in &evict {
            state.jobs.remove(id);
        }
        Ok(evict.len() as u64)
    }

    async fn counts(&self) -> QueueResult<StatusCounts> {
        let now = self.clock.now();
        let state = self.lock();
        let mut counts = StatusCounts::default();
        for job in state.jobs.values() {
            match job.state {
                JobState::Pending if job.run_at <= now => counts.waiting += 1,
                JobState::Pending => counts.delayed += 1,
                JobState::Processing => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn recent_failures(&self, limit: usize) -> QueueResult<Vec<FailureSample>> {
        Ok(self.lock().failures.iter().take(limit).cloned().collect())
    }

    async fn ping(&self) -> QueueResult<()> {
        Ok(())
    }

    async fn worker_heartbeat(&self, consumer: &str) -> QueueResult<()> {
        let now = self.clock.now();
        self.lock().workers.insert(consumer.to_string(), now);
        Ok(())
    }

    async fn active_workers(&self) -> QueueResult<u32> {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(self.config.worker_ttl).unwrap_or_default();
        let mut state = self.lock();
        state.workers.retain(|_, last| now - *last <= ttl);
        Ok(state.workers.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use vgen_models::{FailureKind, GenerationRequest, Provider};

    fn new_job(id: &str) -> NewJob {
        NewJob {
            id: JobId::from_string(id),
            provider: Provider::Runway,
            request: GenerationRequest::new("a fox sprinting through snow", 8),
        }
    }

    fn queue_with_clock() -> (InMemoryJobQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let config = QueueConfig {
            max_jitter: Duration::ZERO,
            ..QueueConfig::default()
        };
        let queue = InMemoryJobQueue::new(config, clock.clone(), Vec::new());
        (queue, clock)
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_by_id() {
        let (queue, _clock) = queue_with_clock();

        let first = queue
            .enqueue(new_job("job-1"), EnqueueOptions::default())
            .await
            .unwrap();
        assert!(!first.is_duplicate());

        let second = queue
            .enqueue(new_job("job-1"), EnqueueOptions::default())
            .await
            .unwrap();
        assert!(second.is_duplicate());
        assert_eq!(second.job().created_at, first.job().created_at);

        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.waiting, 1);
    }

    #[tokio::test]
    async fn dequeue_claims_each_job_once() {
        let (queue, _clock) = queue_with_clock();
        queue
            .enqueue(new_job("job-1"), EnqueueOptions::default())
            .await
            .unwrap();

        let leased = queue.dequeue("w1").await.unwrap().unwrap();
        assert_eq!(leased.job.id.as_str(), "job-1");
        // Claimed: a second worker gets nothing.
        assert!(queue.dequeue("w2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_before_claim_removes_the_job() {
        let (queue, _clock) = queue_with_clock();
        queue
            .enqueue(new_job("job-1"), EnqueueOptions::default())
            .await
            .unwrap();

        assert_eq!(
            queue.cancel(&JobId::from_string("job-1")).await.unwrap(),
            CancelOutcome::Cancelled
        );
        assert!(queue.dequeue("w1").await.unwrap().is_none());
        assert!(queue.get(&JobId::from_string("job-1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_after_claim_is_in_flight() {
        let (queue, _clock) = queue_with_clock();
        queue
            .enqueue(new_job("job-1"), EnqueueOptions::default())
            .await
            .unwrap();
        let leased = queue.dequeue("w1").await.unwrap().unwrap();

        assert_eq!(
            queue.cancel(&leased.job.id).await.unwrap(),
            CancelOutcome::InFlight
        );
        // Attempt proceeds untouched.
        assert!(queue.mark_started(&leased.job.id).await.is_ok());
    }

    #[tokio::test]
    async fn cancel_unknown_job_is_not_found() {
        let (queue, _clock) = queue_with_clock();
        assert_eq!(
            queue.cancel(&JobId::from_string("ghost")).await.unwrap(),
            CancelOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn retryable_failure_is_delayed_until_backoff_elapses() {
        let (queue, clock) = queue_with_clock();
        queue
            .enqueue(new_job("job-1"), EnqueueOptions::default())
            .await
            .unwrap();

        let leased = queue.dequeue("w1").await.unwrap().unwrap();
        queue.mark_started(&leased.job.id).await.unwrap();

        let failure = JobFailure::new(FailureKind::RateLimited, "throttled");
        let disposition = queue.report_failure(&leased.job.id, &failure).await.unwrap();
        queue.ack(&leased.job.id, &leased.lease).await.unwrap();

        let delay = match disposition {
            FailureDisposition::Retried { delay, attempts } => {
                assert_eq!(attempts, 1);
                delay
            }
            other => panic!("unexpected disposition: {other:?}"),
        };

        // Not eligible yet.
        assert!(queue.dequeue("w1").await.unwrap().is_none());
        assert_eq!(queue.counts().await.unwrap().delayed, 1);

        clock.advance(delay);
        let again = queue.dequeue("w1").await.unwrap().unwrap();
        assert_eq!(again.job.id.as_str(), "job-1");
        assert_eq!(again.job.error_message.as_deref(), Some("throttled"));
    }

    #[tokio::test]
    async fn non_retryable_failure_is_terminal_after_one_attempt() {
        let (queue, _clock) = queue_with_clock();
        queue
            .enqueue(new_job("job-1"), EnqueueOptions::default())
            .await
            .unwrap();

        let leased = queue.dequeue("w1").await.unwrap().unwrap();
        queue.mark_started(&leased.job.id).await.unwrap();

        let failure = JobFailure::new(FailureKind::Auth, "invalid credentials");
        let disposition = queue.report_failure(&leased.job.id, &failure).await.unwrap();
        assert!(matches!(disposition, FailureDisposition::Failed { .. }));

        let job = queue.get(&leased.job.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.error_message.as_deref(), Some("invalid credentials"));

        let failures = queue.recent_failures(10).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error_message, "invalid credentials");
    }

    #[tokio::test]
    async fn manual_retry_requires_failed_state_and_attempt_budget() {
        let (queue, _clock) = queue_with_clock();
        queue
            .enqueue(
                new_job("job-1"),
                EnqueueOptions {
                    max_attempts: Some(2),
                    ..EnqueueOptions::default()
                },
            )
            .await
            .unwrap();

        // Pending job cannot be retried.
        assert!(matches!(
            queue.retry(&JobId::from_string("job-1")).await,
            Err(QueueError::InvalidState { .. })
        ));

        let leased = queue.dequeue("w1").await.unwrap().unwrap();
        queue.mark_started(&leased.job.id).await.unwrap();
        queue
            .report_failure(&leased.job.id, &JobFailure::new(FailureKind::Auth, "bad key"))
            .await
            .unwrap();
        queue.ack(&leased.job.id, &leased.lease).await.unwrap();

        // One attempt used, one left: retry succeeds.
        let job = queue.retry(&leased.job.id).await.unwrap();
        assert_eq!(job.state, JobState::Pending);

        let leased = queue.dequeue("w1").await.unwrap().unwrap();
        queue.mark_started(&leased.job.id).await.unwrap();
        queue
            .report_failure(&leased.job.id, &JobFailure::new(FailureKind::Auth, "bad key"))
            .await
            .unwrap();

        // Budget exhausted now.
        assert!(matches!(
            queue.retry(&leased.job.id).await,
            Err(QueueError::AttemptsExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn clean_evicts_only_old_terminal_jobs() {
        let (queue, clock) = queue_with_clock();
        queue
            .enqueue(new_job("done"), EnqueueOptions::default())
            .await
            .unwrap();
        queue
            .enqueue(new_job("waiting"), EnqueueOptions::default())
            .await
            .unwrap();

        let leased = queue.dequeue("w1").await.unwrap().unwrap();
        queue.mark_started(&leased.job.id).await.unwrap();
        queue
            .complete(&leased.job.id, "https://storage/done.mp4", None)
            .await
            .unwrap();
        queue.ack(&leased.job.id, &leased.lease).await.unwrap();

        // Too fresh to evict.
        let evicted = queue
            .clean(Duration::from_secs(3600), &[JobState::Completed], 10)
            .await
            .unwrap();
        assert_eq!(evicted, 0);

        clock.advance(Duration::from_secs(24 * 3600 + 1));
        let evicted = queue
            .clean(Duration::from_secs(3600), &[JobState::Completed], 10)
            .await
            .unwrap();
        assert_eq!(evicted, 1);

        // The pending job is untouched.
        assert!(queue.get(&JobId::from_string("waiting")).await.unwrap().is_some());
        assert!(queue.get(&JobId::from_string("done")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn heartbeats_expire_after_ttl() {
        let (queue, clock) = queue_with_clock();
        queue.worker_heartbeat("w1").await.unwrap();
        queue.worker_heartbeat("w2").await.unwrap();
        assert_eq!(queue.active_workers().await.unwrap(), 2);

        clock.advance(Duration::from_secs(91));
        queue.worker_heartbeat("w2").await.unwrap();
        assert_eq!(queue.active_workers().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn provider_job_identity_is_assigned_once_per_attempt() {
        let (queue, _clock) = queue_with_clock();
        queue
            .enqueue(new_job("job-1"), EnqueueOptions::default())
            .await
            .unwrap();
        let leased = queue.dequeue("w1").await.unwrap().unwrap();
        queue.mark_started(&leased.job.id).await.unwrap();

        queue.set_provider_job(&leased.job.id, "p-1").await.unwrap();
        assert!(matches!(
            queue.set_provider_job(&leased.job.id, "p-2").await,
            Err(QueueError::InvalidState { .. })
        ));
    }
}
