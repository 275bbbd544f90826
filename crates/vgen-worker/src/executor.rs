//! Job executor.
//!
//! A pool of consume-loops sharing one semaphore (the concurrency bound is
//! global, not per-loop) and one rolling-window rate limiter on job starts.
//! Each claimed job runs submit -> poll -> download -> upload -> finalize
//! strictly in order; any error or panic is classified and reported to the
//! queue, which owns the retry decision.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use metrics::histogram;
use reqwest::Client;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vgen_models::Job;
use vgen_providers::ProviderRegistry;
use vgen_queue::{Clock, FailureDisposition, JobQueue, LeasedJob, QueueError};
use vgen_storage::StorageUploader;

use crate::assets;
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::poller::{PollerConfig, PollerOutcome, ProgressSink, StatusPoller};

/// Everything a job execution needs, built once at startup and shared.
///
/// No ambient globals: queue, adapters, uploader and clock are all injected
/// here and owned for the process lifetime.
pub struct WorkerContext {
    pub queue: Arc<dyn JobQueue>,
    pub adapters: ProviderRegistry,
    pub uploader: Arc<dyn StorageUploader>,
    pub clock: Arc<dyn Clock>,
    pub http: Client,
    pub config: WorkerConfig,
}

/// Forwards poller progress into the job record.
struct QueueProgress {
    queue: Arc<dyn JobQueue>,
    id: vgen_models::JobId,
}

#[async_trait::async_trait]
impl ProgressSink for QueueProgress {
    async fn report(&self, progress: u8) {
        if let Err(e) = self.queue.set_progress(&self.id, progress).await {
            debug!(job_id = %self.id, "Progress update dropped: {e}");
        }
    }
}

/// Job executor that processes jobs from the queue.
pub struct JobExecutor {
    ctx: Arc<WorkerContext>,
    semaphore: Arc<Semaphore>,
    limiter: Arc<DefaultDirectRateLimiter>,
    shutdown: tokio::sync::watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    /// Create a new job executor.
    pub fn new(ctx: WorkerContext) -> WorkerResult<Self> {
        let config = &ctx.config;
        if config.concurrency == 0 {
            return Err(WorkerError::config("worker concurrency must be at least 1"));
        }
        let count = NonZeroU32::new(config.rate_limit_count)
            .ok_or_else(|| WorkerError::config("rate limit count must be at least 1"))?;
        let period = config.rate_limit_window / config.rate_limit_count.max(1);
        let quota = Quota::with_period(period)
            .ok_or_else(|| WorkerError::config("rate limit window must be non-zero"))?
            .allow_burst(count);

        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        let (shutdown, _) = tokio::sync::watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Ok(Self {
            ctx: Arc::new(ctx),
            semaphore,
            limiter: Arc::new(RateLimiter::direct(quota)),
            shutdown,
            consumer_name,
        })
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Signal shutdown: stop claiming new jobs, let in-flight attempts
    /// finish (bounded by the shutdown timeout). Unclaimed jobs stay queued
    /// for a future worker.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Run the consume loop until shutdown.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            consumer = %self.consumer_name,
            concurrency = self.ctx.config.concurrency,
            "Starting job executor"
        );

        let heartbeat_task = self.spawn_heartbeat();
        let reclaim_task = self.spawn_reclaim();

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.step() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {e}");
                        // Back off so a dead backend does not spin the loop.
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        heartbeat_task.abort();
        reclaim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        let _ = tokio::time::timeout(self.ctx.config.shutdown_timeout, self.wait_for_idle()).await;

        info!("Job executor stopped");
        Ok(())
    }

    /// Drain everything currently eligible, then return.
    ///
    /// Used by one-shot invocations and tests; delayed retries become
    /// eligible only when the clock advances, which stays in the caller's
    /// hands.
    pub async fn run_until_idle(&self) -> WorkerResult<u64> {
        self.ctx.queue.worker_heartbeat(&self.consumer_name).await.ok();

        let mut join_set = JoinSet::new();
        let mut claimed = 0u64;
        loop {
            match self.ctx.queue.dequeue(&self.consumer_name).await? {
                Some(leased) => {
                    self.limiter.until_ready().await;
                    let permit = self
                        .semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .map_err(|_| WorkerError::internal("semaphore closed"))?;
                    let ctx = Arc::clone(&self.ctx);
                    join_set.spawn(async move {
                        let _permit = permit;
                        Self::execute_leased(ctx, leased).await;
                    });
                    claimed += 1;
                }
                None => {
                    if join_set.join_next().await.is_none() {
                        break;
                    }
                }
            }
        }
        while join_set.join_next().await.is_some() {}
        Ok(claimed)
    }

    /// One consume step: claim up to one job and spawn its execution.
    async fn step(&self) -> WorkerResult<()> {
        if self.semaphore.available_permits() == 0 {
            tokio::time::sleep(self.ctx.config.idle_wait).await;
            return Ok(());
        }

        let Some(leased) = self.ctx.queue.dequeue(&self.consumer_name).await? else {
            tokio::time::sleep(self.ctx.config.idle_wait).await;
            return Ok(());
        };

        self.limiter.until_ready().await;
        self.spawn_execution(leased).await
    }

    async fn spawn_execution(&self, leased: LeasedJob) -> WorkerResult<()> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::internal("semaphore closed"))?;
        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            let _permit = permit;
            Self::execute_leased(ctx, leased).await;
        });
        Ok(())
    }

    fn spawn_heartbeat(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.ctx.queue);
        let consumer = self.consumer_name.clone();
        let interval = self.ctx.config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = queue.worker_heartbeat(&consumer).await {
                    warn!("Worker heartbeat failed: {e}");
                }
            }
        })
    }

    /// Periodically pick up jobs abandoned by crashed workers.
    fn spawn_reclaim(&self) -> tokio::task::JoinHandle<()> {
        let ctx = Arc::clone(&self.ctx);
        let semaphore = Arc::clone(&self.semaphore);
        let consumer = self.consumer_name.clone();
        let interval = self.ctx.config.reclaim_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match ctx.queue.reclaim(&consumer, 5).await {
                    Ok(jobs) if !jobs.is_empty() => {
                        info!("Reclaimed {} pending jobs", jobs.len());
                        for leased in jobs {
                            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                                return;
                            };
                            let ctx = Arc::clone(&ctx);
                            tokio::spawn(async move {
                                let _permit = permit;
                                Self::execute_leased(ctx, leased).await;
                            });
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Failed to reclaim pending jobs: {e}"),
                }
            }
        })
    }

    async fn wait_for_idle(&self) {
        loop {
            if self.semaphore.available_permits() == self.ctx.config.concurrency {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Execute one leased job end to end, reporting the outcome.
    async fn execute_leased(ctx: Arc<WorkerContext>, leased: LeasedJob) {
        let id = leased.job.id.clone();
        let started = Instant::now();

        let job = match ctx.queue.mark_started(&id).await {
            Ok(job) => job,
            Err(QueueError::AttemptsExhausted { .. }) => {
                // Queue already failed the job terminally.
                ctx.queue.ack(&id, &leased.lease).await.ok();
                return;
            }
            Err(QueueError::NotFound(_)) => {
                // Cancelled between claim and start.
                debug!(job_id = %id, "Job vanished before start, skipping");
                ctx.queue.ack(&id, &leased.lease).await.ok();
                return;
            }
            Err(e) => {
                // Transient queue error: leave the lease pending so the
                // entry is redelivered.
                warn!(job_id = %id, "Failed to start job, leaving for redelivery: {e}");
                return;
            }
        };

        info!(job_id = %id, provider = %job.provider, attempt = job.attempts, "Executing job");

        let result = match std::panic::AssertUnwindSafe(Self::run_pipeline(&ctx, &job))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(WorkerError::internal(panic_message(panic))),
        };

        match result {
            Ok(()) => {
                info!(job_id = %id, "Job completed");
            }
            Err(e) => {
                let failure = e.into_failure(job.provider);
                match ctx.queue.report_failure(&id, &failure).await {
                    Ok(FailureDisposition::Retried { delay, attempts }) => {
                        info!(
                            job_id = %id,
                            attempts,
                            delay_ms = delay.as_millis() as u64,
                            "Job attempt failed, rescheduled: {}", failure.message
                        );
                    }
                    Ok(FailureDisposition::Failed { .. }) => {
                        warn!(job_id = %id, kind = %failure.kind, "Job failed terminally: {}", failure.message);
                    }
                    Err(report_err) => {
                        error!(job_id = %id, "Failed to report job failure: {report_err}");
                    }
                }
            }
        }

        histogram!("vgen_job_attempt_duration_seconds").record(started.elapsed().as_secs_f64());

        if let Err(e) = ctx.queue.ack(&id, &leased.lease).await {
            error!(job_id = %id, "Failed to ack job: {e}");
        }
    }

    /// The per-job pipeline: submit -> poll -> download -> upload -> finalize.
    async fn run_pipeline(ctx: &Arc<WorkerContext>, job: &Job) -> WorkerResult<()> {
        let adapter = ctx.adapters.get(job.provider).ok_or_else(|| {
            WorkerError::config(format!("no adapter configured for provider {}", job.provider))
        })?;

        let provider_job_id = adapter.submit(&job.request).await?;
        ctx.queue.set_provider_job(&job.id, &provider_job_id).await?;
        debug!(job_id = %job.id, provider_job_id = %provider_job_id, "Submitted to provider");

        let poller = StatusPoller::new(
            Arc::clone(&adapter),
            Arc::clone(&ctx.clock),
            PollerConfig {
                interval: ctx.config.poll_interval,
                max_polls: ctx.config.max_poll_attempts,
                progress_cap: ctx.config.progress_cap,
            },
        );
        let progress = QueueProgress {
            queue: Arc::clone(&ctx.queue),
            id: job.id.clone(),
        };

        match poller.run(&provider_job_id, &progress).await? {
            PollerOutcome::Completed {
                result_url,
                thumbnail_url,
            } => {
                let stored_url = assets::store_result(
                    &ctx.http,
                    ctx.uploader.as_ref(),
                    job,
                    &ctx.config.result_prefix,
                    &result_url,
                )
                .await?;

                let stored_thumbnail = match thumbnail_url {
                    Some(url) => match assets::store_thumbnail(
                        &ctx.http,
                        ctx.uploader.as_ref(),
                        job,
                        &ctx.config.result_prefix,
                        &url,
                    )
                    .await
                    {
                        Ok(stored) => Some(stored),
                        Err(e) => {
                            warn!(job_id = %job.id, "Thumbnail mirror failed, continuing: {e}");
                            None
                        }
                    },
                    None => None,
                };

                ctx.queue
                    .complete(&job.id, &stored_url, stored_thumbnail.as_deref())
                    .await?;
                Ok(())
            }
            PollerOutcome::Failed { kind, message } => Err(WorkerError::Generation { kind, message }),
            PollerOutcome::TimedOut { polls } => Err(WorkerError::PollTimeout { polls }),
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("job panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("job panicked: {s}")
    } else {
        "job panicked".to_string()
    }
}
