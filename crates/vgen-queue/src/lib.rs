//! Durable, idempotent job queue.
//!
//! This crate provides:
//! - The `JobQueue` contract consumed by the API and the worker pool
//! - A Redis Streams production implementation
//! - An in-memory implementation driven by an injectable clock
//! - The retry policy that decides rescheduling after classified failures
//! - Queue events and the `JobRepository` persistence collaborator

pub mod clock;
pub mod error;
pub mod events;
pub mod memory;
pub mod queue;
pub mod redis_queue;
pub mod repository;
pub mod retry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{QueueError, QueueResult};
pub use events::{EventSink, JobEvent, MetricsSink};
pub use memory::InMemoryJobQueue;
pub use queue::{
    CancelOutcome, EnqueueOptions, EnqueueOutcome, FailureDisposition, FailureSample, JobQueue,
    LeasedJob, NewJob, QueueConfig, StatusCounts,
};
pub use redis_queue::RedisJobQueue;
pub use repository::{InMemoryJobRepository, JobRepository, JobUpdate, RepositorySink};
pub use retry::{RetryDecision, RetryPolicy};
