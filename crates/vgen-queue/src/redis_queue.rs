//! Redis-backed queue implementation.
//!
//! Job records live as JSON values keyed by job ID, which doubles as the
//! idempotency guard (`SET NX`). Dispatch goes through a Redis Stream with a
//! consumer group, so an entry is delivered to exactly one worker at a time;
//! delayed retries sit in a sorted set scored by their due time and are
//! promoted into the stream on dequeue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use vgen_models::{Job, JobFailure, JobId, JobState};

use crate::clock::Clock;
use crate::error::{QueueError, QueueResult};
use crate::events::{EventSink, JobEvent};
use crate::queue::{
    CancelOutcome, EnqueueOptions, EnqueueOutcome, FailureDisposition, FailureSample, JobQueue,
    LeasedJob, NewJob, QueueConfig, StatusCounts,
};
use crate::retry::{RetryDecision, RetryPolicy};

/// Redis Streams `JobQueue`.
pub struct RedisJobQueue {
    client: redis::Client,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl RedisJobQueue {
    /// Create a new queue client.
    pub fn new(
        config: QueueConfig,
        clock: Arc<dyn Clock>,
        sinks: Vec<Arc<dyn EventSink>>,
    ) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let policy = RetryPolicy::new(config.base_delay, config.cap_delay, config.max_jitter);
        Ok(Self {
            client,
            config,
            clock,
            policy,
            sinks,
        })
    }

    /// Initialize the queue (create the consumer group if missing).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    async fn conn(&self) -> QueueResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn emit(&self, event: JobEvent) {
        for sink in &self.sinks {
            sink.on_event(&event).await;
        }
    }

    fn job_key(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.config.key_prefix, id)
    }

    fn state_key(&self, name: &str) -> String {
        format!("{}:state:{}", self.config.key_prefix, name)
    }

    fn delayed_key(&self) -> String {
        format!("{}:delayed", self.config.key_prefix)
    }

    fn failures_key(&self) -> String {
        format!("{}:failures", self.config.key_prefix)
    }

    fn workers_key(&self) -> String {
        format!("{}:workers", self.config.key_prefix)
    }

    async fn load_job(&self, conn: &mut MultiplexedConnection, id: &JobId) -> QueueResult<Option<Job>> {
        let raw: Option<String> = conn.get(self.job_key(id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn save_job(&self, conn: &mut MultiplexedConnection, job: &Job) -> QueueResult<()> {
        let raw = serde_json::to_string(job)?;
        conn.set::<_, _, ()>(self.job_key(&job.id), raw).await?;
        Ok(())
    }

    async fn move_index(
        &self,
        conn: &mut MultiplexedConnection,
        id: &JobId,
        from: &str,
        to: &str,
    ) -> QueueResult<()> {
        conn.srem::<_, _, ()>(self.state_key(from), id.as_str()).await?;
        conn.sadd::<_, _, ()>(self.state_key(to), id.as_str()).await?;
        Ok(())
    }

    async fn push_to_stream(&self, conn: &mut MultiplexedConnection, id: &JobId) -> QueueResult<String> {
        let entry_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("id")
            .arg(id.as_str())
            .query_async(&mut *conn)
            .await?;
        Ok(entry_id)
    }

    async fn push_failure(
        &self,
        conn: &mut MultiplexedConnection,
        sample: &FailureSample,
    ) -> QueueResult<()> {
        let payload = serde_json::to_string(sample)?;
        conn.lpush::<_, _, ()>(self.failures_key(), payload).await?;
        conn.ltrim::<_, ()>(
            self.failures_key(),
            0,
            self.config.failure_sample_size.saturating_sub(1) as isize,
        )
        .await?;
        Ok(())
    }

    /// Move due delayed jobs into the dispatch stream.
    async fn promote_due(&self, conn: &mut MultiplexedConnection) -> QueueResult<()> {
        let now_ms = self.clock.now().timestamp_millis();
        let due: Vec<String> = conn
            .zrangebyscore_limit(self.delayed_key(), "-inf", now_ms, 0, 16)
            .await?;

        for raw_id in due {
            let id = JobId::from_string(&raw_id);
            conn.zrem::<_, _, ()>(self.delayed_key(), &raw_id).await?;
            conn.sadd::<_, _, ()>(self.state_key("waiting"), &raw_id).await?;
            self.push_to_stream(conn, &id).await?;
            debug!(job_id = %id, "Promoted delayed job");
        }
        Ok(())
    }

    /// Parse stream entries into leased jobs, acking ghosts.
    async fn lease_entries(
        &self,
        conn: &mut MultiplexedConnection,
        entries: Vec<(String, Option<String>)>,
        require_pending: bool,
    ) -> QueueResult<Vec<LeasedJob>> {
        let mut leased = Vec::new();
        for (entry_id, raw_job_id) in entries {
            let Some(raw_job_id) = raw_job_id else {
                warn!(entry_id = %entry_id, "Stream entry without job id, acking");
                self.ack_entry(conn, &entry_id).await.ok();
                continue;
            };
            let id = JobId::from_string(&raw_job_id);
            match self.load_job(conn, &id).await? {
                Some(job) if !require_pending || job.state == JobState::Pending => {
                    leased.push(LeasedJob { job, lease: entry_id });
                }
                Some(job) => {
                    debug!(job_id = %id, state = %job.state, "Skipping non-pending stream entry");
                    self.ack_entry(conn, &entry_id).await.ok();
                }
                None => {
                    // Cancelled or evicted while queued.
                    self.ack_entry(conn, &entry_id).await.ok();
                }
            }
        }
        Ok(leased)
    }

    async fn ack_entry(&self, conn: &mut MultiplexedConnection, entry_id: &str) -> QueueResult<()> {
        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(entry_id)
            .query_async::<()>(&mut *conn)
            .await?;
        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(entry_id)
            .query_async::<()>(&mut *conn)
            .await?;
        Ok(())
    }

    fn entry_pairs(reply: redis::streams::StreamReadReply) -> Vec<(String, Option<String>)> {
        let mut pairs = Vec::new();
        for stream_key in reply.keys {
            for entry in stream_key.ids {
                let job_id = match entry.map.get("id") {
                    Some(redis::Value::BulkString(raw)) => {
                        Some(String::from_utf8_lossy(raw).to_string())
                    }
                    _ => None,
                };
                pairs.push((entry.id.clone(), job_id));
            }
        }
        pairs
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, new: NewJob, options: EnqueueOptions) -> QueueResult<EnqueueOutcome> {
        let mut conn = self.conn().await?;

        let mut job = Job::new(
            new.id.clone(),
            new.provider,
            new.request,
            options.resolve(&self.config),
        );
        job.run_at = self.clock.now();

        // The record itself is the idempotency guard.
        let raw = serde_json::to_string(&job)?;
        let created: bool = conn.set_nx(self.job_key(&job.id), raw).await?;
        if !created {
            let existing = self
                .load_job(&mut conn, &new.id)
                .await?
                .ok_or_else(|| QueueError::NotFound(new.id.clone()))?;
            debug!(job_id = %new.id, "Duplicate enqueue, returning existing job");
            return Ok(EnqueueOutcome::Duplicate(existing));
        }

        conn.sadd::<_, _, ()>(self.state_key("waiting"), job.id.as_str()).await?;
        let entry_id = self.push_to_stream(&mut conn, &job.id).await?;
        info!(job_id = %job.id, entry_id = %entry_id, provider = %job.provider, "Enqueued job");

        self.emit(JobEvent::Created(job.clone())).await;
        Ok(EnqueueOutcome::Created(job))
    }

    async fn dequeue(&self, consumer: &str) -> QueueResult<Option<LeasedJob>> {
        let mut conn = self.conn().await?;
        self.promote_due(&mut conn).await?;

        let reply: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(self.config.block_timeout.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let entries = Self::entry_pairs(reply);
        let mut leased = self.lease_entries(&mut conn, entries, true).await?;
        Ok(leased.pop())
    }

    async fn reclaim(&self, consumer: &str, limit: usize) -> QueueResult<Vec<LeasedJob>> {
        let mut conn = self.conn().await?;

        let pending: redis::streams::StreamPendingReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .query_async(&mut conn)
            .await?;

        if pending.count() == 0 {
            return Ok(Vec::new());
        }

        let reply: redis::streams::StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(self.config.claim_min_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(limit)
            .query_async(&mut conn)
            .await?;

        let mut entries = Vec::new();
        for entry in reply.ids {
            let job_id = match entry.map.get("id") {
                Some(redis::Value::BulkString(raw)) => Some(String::from_utf8_lossy(raw).to_string()),
                _ => None,
            };
            entries.push((entry.id.clone(), job_id));
        }

        // Reclaimed jobs may already be mid-attempt (`Processing`) from the
        // dead consumer; re-execution is the at-least-once contract.
        let leased = self.lease_entries(&mut conn, entries, false).await?;
        if !leased.is_empty() {
            info!(count = leased.len(), consumer = consumer, "Reclaimed pending jobs");
        }
        Ok(leased)
    }

    async fn ack(&self, _id: &JobId, lease: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        self.ack_entry(&mut conn, lease).await
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<Job>> {
        let mut conn = self.conn().await?;
        self.load_job(&mut conn, id).await
    }

    async fn mark_started(&self, id: &JobId) -> QueueResult<Job> {
        let now = self.clock.now();
        let mut conn = self.conn().await?;
        let mut job = self
            .load_job(&mut conn, id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;

        if job.state.is_terminal() {
            return Err(QueueError::invalid_state(id.clone(), job.state, "mark_started"));
        }

        if !job.has_attempts_left() {
            let attempts = job.attempts;
            let max_attempts = job.options.max_attempts;
            job.fail("attempt budget exhausted before execution", now);
            self.save_job(&mut conn, &job).await?;
            conn.srem::<_, _, ()>(self.state_key("waiting"), id.as_str()).await?;
            conn.srem::<_, _, ()>(self.state_key("active"), id.as_str()).await?;
            conn.sadd::<_, _, ()>(self.state_key("failed"), id.as_str()).await?;
            self.push_failure(
                &mut conn,
                &FailureSample {
                    id: id.clone(),
                    error_message: "attempt budget exhausted before execution".to_string(),
                    attempts,
                    timestamp: now,
                },
            )
            .await?;
            self.emit(JobEvent::Failed(job)).await;
            return Err(QueueError::AttemptsExhausted {
                id: id.clone(),
                attempts,
                max_attempts,
            });
        }

        job.begin_attempt(now);
        self.save_job(&mut conn, &job).await?;
        self.move_index(&mut conn, id, "waiting", "active").await?;
        self.emit(JobEvent::Started(job.clone())).await;
        Ok(job)
    }

    async fn set_provider_job(&self, id: &JobId, provider_job_id: &str) -> QueueResult<()> {
        let now = self.clock.now();
        let mut conn = self.conn().await?;
        let mut job = self
            .load_job(&mut conn, id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;
        if !job.assign_provider_job(provider_job_id, now) {
            return Err(QueueError::invalid_state(id.clone(), job.state, "set_provider_job"));
        }
        self.save_job(&mut conn, &job).await
    }

    async fn set_progress(&self, id: &JobId, progress: u8) -> QueueResult<()> {
        let now = self.clock.now();
        let mut conn = self.conn().await?;
        let mut job = self
            .load_job(&mut conn, id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;
        job.set_progress(progress, now);
        self.save_job(&mut conn, &job).await
    }

    async fn complete(
        &self,
        id: &JobId,
        result_url: &str,
        thumbnail_url: Option<&str>,
    ) -> QueueResult<Job> {
        let now = self.clock.now();
        let mut conn = self.conn().await?;
        let mut job = self
            .load_job(&mut conn, id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;

        if !job.complete(result_url, thumbnail_url.map(str::to_string), now) {
            return Err(QueueError::invalid_state(id.clone(), job.state, "complete"));
        }
        self.save_job(&mut conn, &job).await?;
        self.move_index(&mut conn, id, "active", "completed").await?;
        self.emit(JobEvent::Completed(job.clone())).await;
        Ok(job)
    }

    async fn report_failure(&self, id: &JobId, failure: &JobFailure) -> QueueResult<FailureDisposition> {
        let now = self.clock.now();
        let mut conn = self.conn().await?;
        let mut job = self
            .load_job(&mut conn, id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;

        if job.state != JobState::Processing {
            return Err(QueueError::invalid_state(id.clone(), job.state, "report_failure"));
        }

        match self.policy.decide(failure, job.attempts, &job.options) {
            RetryDecision::Retry { delay } => {
                let run_at = now + chrono::Duration::from_std(delay).unwrap_or_default();
                job.reschedule(Some(failure.message.clone()), run_at, now);
                self.save_job(&mut conn, &job).await?;
                conn.srem::<_, _, ()>(self.state_key("active"), id.as_str()).await?;
                conn.zadd::<_, _, _, ()>(self.delayed_key(), id.as_str(), run_at.timestamp_millis())
                    .await?;
                let attempts = job.attempts;
                info!(job_id = %id, delay_ms = delay.as_millis() as u64, attempts = attempts, "Job rescheduled");
                self.emit(JobEvent::Retried { job, delay }).await;
                Ok(FailureDisposition::Retried { delay, attempts })
            }
            RetryDecision::GiveUp => {
                job.fail(failure.message.clone(), now);
                self.save_job(&mut conn, &job).await?;
                self.move_index(&mut conn, id, "active", "failed").await?;
                self.push_failure(
                    &mut conn,
                    &FailureSample {
                        id: id.clone(),
                        error_message: failure.message.clone(),
                        attempts: job.attempts,
                        timestamp: now,
                    },
                )
                .await?;
                warn!(job_id = %id, kind = %failure.kind, "Job terminally failed: {}", failure.message);
                self.emit(JobEvent::Failed(job.clone())).await;
                Ok(FailureDisposition::Failed { job })
            }
        }
    }

    async fn cancel(&self, id: &JobId) -> QueueResult<CancelOutcome> {
        let mut conn = self.conn().await?;
        let Some(job) = self.load_job(&mut conn, id).await? else {
            return Ok(CancelOutcome::NotFound);
        };

        match job.state {
            JobState::Processing => Ok(CancelOutcome::InFlight),
            JobState::Completed | JobState::Failed => Ok(CancelOutcome::Terminal),
            JobState::Pending => {
                conn.del::<_, ()>(self.job_key(id)).await?;
                conn.srem::<_, _, ()>(self.state_key("waiting"), id.as_str()).await?;
                conn.zrem::<_, _, ()>(self.delayed_key(), id.as_str()).await?;
                // The stream entry, if any, becomes a ghost that consumers
                // ack and skip.
                info!(job_id = %id, "Job cancelled");
                self.emit(JobEvent::Cancelled(job)).await;
                Ok(CancelOutcome::Cancelled)
            }
        }
    }

    async fn retry(&self, id: &JobId) -> QueueResult<Job> {
        let now = self.clock.now();
        let mut conn = self.conn().await?;
        let mut job = self
            .load_job(&mut conn, id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;

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
        self.save_job(&mut conn, &job).await?;
        self.move_index(&mut conn, id, "failed", "waiting").await?;
        self.push_to_stream(&mut conn, id).await?;
        info!(job_id = %id, attempts = job.attempts, "Manual retry");
        self.emit(JobEvent::Retried {
            job: job.clone(),
            delay: Duration::ZERO,
        })
        .await;
        Ok(job)
    }

    async fn clean(&self, older_than: Duration, states: &[JobState], limit: usize) -> QueueResult<u64> {
        let now = self.clock.now();
        let mut conn = self.conn().await?;
        let mut evicted = 0u64;

        for state in states {
            if !state.is_terminal() {
                continue;
            }
            let set_name = match state {
                JobState::Completed => "completed",
                JobState::Failed => "failed",
                _ => continue,
            };
            let ids: Vec<String> = conn.smembers(self.state_key(set_name)).await?;
            for raw_id in ids {
                if evicted >= limit as u64 {
                    return Ok(evicted);
                }
                let id = JobId::from_string(&raw_id);
                let Some(job) = self.load_job(&mut conn, &id).await? else {
                    conn.srem::<_, _, ()>(self.state_key(set_name), &raw_id).await?;
                    continue;
                };
                let Some(finished_at) = job.completed_at else {
                    continue;
                };
                let grace = older_than.max(self.config.retention_for(&job, job.state));
                let cutoff = now - chrono::Duration::from_std(grace).unwrap_or_default();
                if finished_at <= cutoff {
                    conn.del::<_, ()>(self.job_key(&id)).await?;
                    conn.srem::<_, _, ()>(self.state_key(set_name), &raw_id).await?;
                    evicted += 1;
                    debug!(job_id = %id, "Evicted terminal job");
                }
            }
        }
        Ok(evicted)
    }

    async fn counts(&self) -> QueueResult<StatusCounts> {
        let mut conn = self.conn().await?;
        let waiting: u64 = conn.scard(self.state_key("waiting")).await?;
        let active: u64 = conn.scard(self.state_key("active")).await?;
        let completed: u64 = conn.scard(self.state_key("completed")).await?;
        let failed: u64 = conn.scard(self.state_key("failed")).await?;
        let delayed: u64 = conn.zcard(self.delayed_key()).await?;
        Ok(StatusCounts {
            waiting,
            active,
            completed,
            failed,
            delayed,
        })
    }

    async fn recent_failures(&self, limit: usize) -> QueueResult<Vec<FailureSample>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let raw: Vec<String> = conn
            .lrange(self.failures_key(), 0, limit.saturating_sub(1) as isize)
            .await?;
        let mut samples = Vec::with_capacity(raw.len());
        for payload in raw {
            match serde_json::from_str(&payload) {
                Ok(sample) => samples.push(sample),
                Err(e) => warn!("Skipping malformed failure sample: {e}"),
            }
        }
        Ok(samples)
    }

    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    async fn worker_heartbeat(&self, consumer: &str) -> QueueResult<()> {
        let now_ms = self.clock.now().timestamp_millis();
        let mut conn = self.conn().await?;
        conn.zadd::<_, _, _, ()>(self.workers_key(), consumer, now_ms).await?;
        Ok(())
    }

    async fn active_workers(&self) -> QueueResult<u32> {
        let now = self.clock.now();
        let cutoff_ms = (now - chrono::Duration::from_std(self.config.worker_ttl).unwrap_or_default())
            .timestamp_millis();
        let mut conn = self.conn().await?;
        conn.zrembyscore::<_, _, _, ()>(self.workers_key(), "-inf", cutoff_ms).await?;
        let count: u64 = conn.zcard(self.workers_key()).await?;
        Ok(count as u32)
    }
}
