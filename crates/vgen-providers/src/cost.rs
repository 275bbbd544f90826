//! Pure cost estimation per provider.
//!
//! Credits charged per rendered second, tiered by resolution. These mirror
//! the published pricing pages and only need to be directionally right: the
//! authoritative charge happens provider-side.

use vgen_models::{GenerationRequest, Provider, Resolution};

/// Credits per rendered second.
fn per_second_rate(provider: Provider, resolution: Resolution) -> u32 {
    match (provider, resolution) {
        (Provider::Runway, Resolution::Hd720) => 5,
        (Provider::Runway, Resolution::Hd1080) => 8,
        (Provider::Luma, Resolution::Hd720) => 4,
        (Provider::Luma, Resolution::Hd1080) => 7,
    }
}

/// Estimate the credit cost of a request.
pub fn estimate_cost(provider: Provider, request: &GenerationRequest) -> u32 {
    per_second_rate(provider, request.resolution).saturating_mul(request.duration_secs)
}
