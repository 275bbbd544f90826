//! End-to-end worker pipeline tests.
//!
//! Deterministic: the queue and poller run on a manual clock, providers are
//! scripted in-process, and rendered assets are served by wiremock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use vgen_models::{GenerationRequest, JobId, JobState, Provider};
use vgen_providers::{PollStatus, ProviderAdapter, ProviderError, ProviderRegistry, ProviderResult};
use vgen_queue::{
    EnqueueOptions, InMemoryJobQueue, JobQueue, ManualClock, NewJob, QueueConfig,
};
use vgen_storage::MemoryUploader;
use vgen_worker::{JobExecutor, WorkerConfig, WorkerContext};

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

type SubmitFn = dyn Fn(u32) -> ProviderResult<String> + Send + Sync;
type PollFn = dyn Fn(u32) -> ProviderResult<PollStatus> + Send + Sync;

/// Adapter with scripted submit/poll behavior and call accounting.
struct TestAdapter {
    submit_fn: Box<SubmitFn>,
    poll_fn: Box<PollFn>,
    submit_calls: AtomicU32,
    poll_calls: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    submit_delay: Option<Duration>,
}

impl TestAdapter {
    fn new(
        submit_fn: impl Fn(u32) -> ProviderResult<String> + Send + Sync + 'static,
        poll_fn: impl Fn(u32) -> ProviderResult<PollStatus> + Send + Sync + 'static,
    ) -> Self {
        Self {
            submit_fn: Box::new(submit_fn),
            poll_fn: Box::new(poll_fn),
            submit_calls: AtomicU32::new(0),
            poll_calls: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
            submit_delay: None,
        }
    }

    fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = Some(delay);
        self
    }

    fn submits(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    fn max_concurrent(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for TestAdapter {
    fn provider(&self) -> Provider {
        Provider::Runway
    }

    async fn submit(&self, _request: &GenerationRequest) -> ProviderResult<String> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.submit_delay {
            tokio::time::sleep(delay).await;
        }
        let call = self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let result = (self.submit_fn)(call);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn poll_status(&self, _provider_job_id: &str) -> ProviderResult<PollStatus> {
        let call = self.poll_calls.fetch_add(1, Ordering::SeqCst);
        (self.poll_fn)(call)
    }

    async fn validate_credentials(&self) -> ProviderResult<()> {
        Ok(())
    }
}

struct Harness {
    queue: Arc<InMemoryJobQueue>,
    clock: Arc<ManualClock>,
    uploader: Arc<MemoryUploader>,
    adapter: Arc<TestAdapter>,
    executor: JobExecutor,
}

fn harness(adapter: TestAdapter, worker_config: WorkerConfig) -> Harness {
    let clock = Arc::new(ManualClock::new());
    let queue_config = QueueConfig {
        max_jitter: Duration::ZERO,
        ..QueueConfig::default()
    };
    let queue = Arc::new(InMemoryJobQueue::new(
        queue_config,
        clock.clone(),
        Vec::new(),
    ));
    let uploader = Arc::new(MemoryUploader::new());
    let adapter = Arc::new(adapter);

    let ctx = WorkerContext {
        queue: queue.clone(),
        adapters: ProviderRegistry::new().register(adapter.clone()),
        uploader: uploader.clone(),
        clock: clock.clone(),
        http: Client::new(),
        config: worker_config,
    };
    let executor = JobExecutor::new(ctx).expect("failed to build executor");

    Harness {
        queue,
        clock,
        uploader,
        adapter,
        executor,
    }
}

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        concurrency: 2,
        rate_limit_count: 1000,
        rate_limit_window: Duration::from_secs(60),
        poll_interval: Duration::from_secs(5),
        max_poll_attempts: 10,
        idle_wait: Duration::from_millis(1),
        ..WorkerConfig::default()
    }
}

fn new_job(id: &str) -> NewJob {
    NewJob {
        id: JobId::from_string(id),
        provider: Provider::Runway,
        request: GenerationRequest::new("a fox sprinting through snow", 8),
    }
}

/// Drive the executor until the job settles, advancing the clock through
/// retry backoff between rounds.
async fn run_to_terminal(h: &Harness, id: &JobId) -> vgen_models::Job {
    for _ in 0..10 {
        h.executor.run_until_idle().await.expect("executor failed");
        let job = h.queue.get(id).await.unwrap().expect("job evicted");
        if job.state.is_terminal() {
            return job;
        }
        h.clock.advance(Duration::from_secs(600));
    }
    panic!("job did not reach a terminal state");
}

#[tokio::test]
async fn happy_path_stores_result_and_completes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/x.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"rendered bytes".to_vec()))
        .mount(&server)
        .await;

    let result_url = format!("{}/x.mp4", server.uri());
    let adapter = TestAdapter::new(
        |_| Ok("p-1".to_string()),
        move |poll| {
            // Two intermediate polls, then success.
            if poll < 2 {
                Ok(PollStatus::Running { progress: None })
            } else {
                Ok(PollStatus::Completed {
                    result_url: result_url.clone(),
                    thumbnail_url: None,
                })
            }
        },
    );

    let h = harness(adapter, worker_config());
    h.queue
        .enqueue(new_job("job-1"), EnqueueOptions::default())
        .await
        .unwrap();

    let job = run_to_terminal(&h, &JobId::from_string("job-1")).await;

    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.result_url.as_deref(), Some("memory://results/job-1.mp4"));
    assert_eq!(job.provider_job_id.as_deref(), Some("p-1"));
    assert_eq!(job.attempts, 1);
    assert_eq!(job.progress, 100);
    assert!(job.error_message.is_none());
    assert_eq!(h.uploader.get("results/job-1.mp4").unwrap(), b"rendered bytes");

    // The poller slept exactly once per intermediate poll.
    assert_eq!(h.clock.slept(), vec![Duration::from_secs(5); 2]);
}

#[tokio::test]
async fn retryable_submit_failures_exhaust_attempts() {
    let adapter = TestAdapter::new(
        |_| {
            Err(ProviderError::RateLimited {
                message: "concurrent generation limit reached".to_string(),
                retry_after: None,
            })
        },
        |_| Ok(PollStatus::Running { progress: None }),
    );

    let h = harness(adapter, worker_config());
    h.queue
        .enqueue(
            new_job("job-1"),
            EnqueueOptions {
                max_attempts: Some(3),
                ..EnqueueOptions::default()
            },
        )
        .await
        .unwrap();

    let job = run_to_terminal(&h, &JobId::from_string("job-1")).await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 3);
    assert_eq!(h.adapter.submits(), 3);
    assert!(job
        .error_message
        .as_deref()
        .unwrap()
        .contains("concurrent generation limit reached"));

    let failures = h.queue.recent_failures(10).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].attempts, 3);
}

#[tokio::test]
async fn non_retryable_submit_failure_is_terminal_after_one_attempt() {
    let adapter = TestAdapter::new(
        |_| Err(ProviderError::auth("invalid api key")),
        |_| Ok(PollStatus::Running { progress: None }),
    );

    let h = harness(adapter, worker_config());
    h.queue
        .enqueue(
            new_job("job-1"),
            EnqueueOptions {
                max_attempts: Some(5),
                ..EnqueueOptions::default()
            },
        )
        .await
        .unwrap();

    let job = run_to_terminal(&h, &JobId::from_string("job-1")).await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(h.adapter.submits(), 1);
    assert!(job.error_message.as_deref().unwrap().contains("invalid api key"));
}

#[tokio::test]
async fn poll_timeout_is_retried_then_terminal() {
    // Provider never finishes.
    let adapter = TestAdapter::new(
        |call| Ok(format!("p-{call}")),
        |_| Ok(PollStatus::Running { progress: None }),
    );

    let mut config = worker_config();
    config.max_poll_attempts = 3;

    let h = harness(adapter, config);
    h.queue
        .enqueue(
            new_job("job-1"),
            EnqueueOptions {
                max_attempts: Some(2),
                ..EnqueueOptions::default()
            },
        )
        .await
        .unwrap();

    let job = run_to_terminal(&h, &JobId::from_string("job-1")).await;

    assert_eq!(job.state, JobState::Failed);
    // Timed out, retried once, timed out again.
    assert_eq!(job.attempts, 2);
    assert_eq!(h.adapter.submits(), 2);
    assert!(job.error_message.as_deref().unwrap().contains("timed out after 3 status polls"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_bound_holds_under_load() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/x.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"bytes".to_vec()))
        .mount(&server)
        .await;

    let result_url = format!("{}/x.mp4", server.uri());
    let adapter = TestAdapter::new(
        |call| Ok(format!("p-{call}")),
        move |_| {
            Ok(PollStatus::Completed {
                result_url: result_url.clone(),
                thumbnail_url: None,
            })
        },
    )
    .with_submit_delay(Duration::from_millis(25));

    let mut config = worker_config();
    config.concurrency = 3;

    let h = harness(adapter, config);
    for i in 0..8 {
        h.queue
            .enqueue(new_job(&format!("job-{i}")), EnqueueOptions::default())
            .await
            .unwrap();
    }

    h.executor.run_until_idle().await.unwrap();

    assert_eq!(h.adapter.submits(), 8);
    assert!(
        h.adapter.max_concurrent() <= 3,
        "saw {} concurrent submissions",
        h.adapter.max_concurrent()
    );

    for i in 0..8 {
        let job = h
            .queue
            .get(&JobId::from_string(format!("job-{i}")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.state, JobState::Completed);
    }
}

#[tokio::test]
async fn cancelled_job_is_never_executed() {
    let adapter = TestAdapter::new(
        |call| Ok(format!("p-{call}")),
        |_| {
            Ok(PollStatus::Failed {
                kind: vgen_models::FailureKind::ProviderUnavailable,
                message: "should not matter".to_string(),
            })
        },
    );

    let h = harness(adapter, worker_config());
    h.queue
        .enqueue(new_job("keep"), EnqueueOptions::default())
        .await
        .unwrap();
    h.queue
        .enqueue(new_job("cancel-me"), EnqueueOptions::default())
        .await
        .unwrap();

    h.queue.cancel(&JobId::from_string("cancel-me")).await.unwrap();

    run_to_terminal(&h, &JobId::from_string("keep")).await;

    // Only the surviving job ever reached the provider.
    assert!(h.queue.get(&JobId::from_string("cancel-me")).await.unwrap().is_none());
    let keep = h.queue.get(&JobId::from_string("keep")).await.unwrap().unwrap();
    assert!(keep.attempts >= 1);
    assert_eq!(h.adapter.submits(), keep.attempts);
}

#[tokio::test]
async fn provider_reported_policy_failure_short_circuits() {
    let adapter = TestAdapter::new(
        |_| Ok("p-1".to_string()),
        |_| {
            Ok(PollStatus::Failed {
                kind: vgen_models::FailureKind::Policy,
                message: "prompt rejected by moderation".to_string(),
            })
        },
    );

    let h = harness(adapter, worker_config());
    h.queue
        .enqueue(new_job("job-1"), EnqueueOptions::default())
        .await
        .unwrap();

    let job = run_to_terminal(&h, &JobId::from_string("job-1")).await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.error_message.as_deref(), Some("prompt rejected by moderation"));
}

#[tokio::test]
async fn thumbnail_is_mirrored_when_present() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/x.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"video".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/thumb.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"thumb".to_vec()))
        .mount(&server)
        .await;

    let result_url = format!("{}/x.mp4", server.uri());
    let thumbnail_url = format!("{}/thumb.jpg", server.uri());
    let adapter = TestAdapter::new(
        |_| Ok("p-1".to_string()),
        move |_| {
            Ok(PollStatus::Completed {
                result_url: result_url.clone(),
                thumbnail_url: Some(thumbnail_url.clone()),
            })
        },
    );

    let h = harness(adapter, worker_config());
    h.queue
        .enqueue(new_job("job-1"), EnqueueOptions::default())
        .await
        .unwrap();

    let job = run_to_terminal(&h, &JobId::from_string("job-1")).await;

    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.thumbnail_url.as_deref(), Some("memory://results/job-1.jpg"));
    assert_eq!(h.uploader.get("results/job-1.jpg").unwrap(), b"thumb");
}
