//! Supported rendering providers.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// External rendering service that executes generation requests.
///
/// The set is closed: a job always targets exactly one of these, and the
/// worker resolves the matching adapter at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Runway text-to-video API
    Runway,
    /// Luma Dream Machine API
    Luma,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Runway => "runway",
            Provider::Luma => "luma",
        }
    }

    /// All supported providers, in registration order.
    pub fn all() -> &'static [Provider] {
        &[Provider::Runway, Provider::Luma]
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unrecognized provider name.
#[derive(Debug, Error)]
#[error("unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "runway" => Ok(Provider::Runway),
            "luma" => Ok(Provider::Luma),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}
