//! The provider adapter contract.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use vgen_models::{FailureKind, GenerationRequest, Provider};

use crate::cost;
use crate::error::ProviderResult;

/// Result of a single status poll.
///
/// `poll_status` is an idempotent read: calling it repeatedly for the same
/// provider job must be safe and must not mutate provider-side state.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    /// Generation still in progress
    Running {
        /// Provider-reported fraction in `[0, 1]`, when available
        progress: Option<f32>,
    },
    /// Generation finished; the result URL is provider-hosted and transient
    Completed {
        result_url: String,
        thumbnail_url: Option<String>,
    },
    /// Provider reports an explicit failure (not merely "still working")
    Failed {
        /// Classification the adapter derived from the provider's error
        kind: FailureKind,
        /// Provider error message, verbatim
        message: String,
    },
}

/// One external rendering service.
///
/// Adapters never retry internally; transient errors surface to the caller
/// so that backoff stays in one place.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Which provider this adapter talks to.
    fn provider(&self) -> Provider;

    /// Submit a generation request, returning the provider-side job ID.
    async fn submit(&self, request: &GenerationRequest) -> ProviderResult<String>;

    /// Poll the status of a previously submitted job.
    async fn poll_status(&self, provider_job_id: &str) -> ProviderResult<PollStatus>;

    /// Estimated cost of a request in credits. Pure.
    fn estimate_cost(&self, request: &GenerationRequest) -> u32 {
        cost::estimate_cost(self.provider(), request)
    }

    /// Cheap authenticated round-trip to verify the configured credentials.
    async fn validate_credentials(&self) -> ProviderResult<()>;
}

/// Adapter lookup by provider, built once at startup and shared.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one for the same provider.
    pub fn register(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.provider(), adapter);
        self
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }

    pub fn providers(&self) -> Vec<Provider> {
        self.adapters.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
