//! Video generation worker.
//!
//! This crate provides:
//! - The job executor: bounded-concurrency consume loop with rate limiting
//! - The provider status poller state machine
//! - Asset download/upload between provider and durable storage
//! - Retention janitor
//! - Graceful shutdown

pub mod assets;
pub mod config;
pub mod error;
pub mod executor;
pub mod janitor;
pub mod poller;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{JobExecutor, WorkerContext};
pub use janitor::Janitor;
pub use poller::{PollerConfig, PollerOutcome, ProgressSink, StatusPoller};
