//! Rendering provider adapters.
//!
//! This crate provides:
//! - The `ProviderAdapter` contract (submit + idempotent status poll)
//! - Concrete adapters for Runway and Luma
//! - Error classification at the provider boundary
//! - Pure cost estimation per provider

pub mod adapter;
pub mod cost;
pub mod error;
pub mod luma;
pub mod runway;

pub use adapter::{PollStatus, ProviderAdapter, ProviderRegistry};
pub use cost::estimate_cost;
pub use error::{ProviderError, ProviderResult};
pub use luma::{LumaAdapter, LumaConfig};
pub use runway::{RunwayAdapter, RunwayConfig};
