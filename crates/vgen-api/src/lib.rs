//! HTTP API for the VidGen job orchestration core.
//!
//! Exposes the external contracts: enqueue, status, cancel, retry, admin
//! aggregates and health probes. The orchestration itself lives in
//! `vgen-queue`/`vgen-worker`; handlers here stay thin.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
