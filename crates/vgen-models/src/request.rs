//! Generation request payloads.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Output resolution tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum Resolution {
    #[default]
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "1080p")]
    Hd1080,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Hd720 => "720p",
            Resolution::Hd1080 => "1080p",
        }
    }

    /// Vertical pixel count, used for provider cost tiers.
    pub fn pixel_height(&self) -> u32 {
        match self {
            Resolution::Hd720 => 720,
            Resolution::Hd1080 => 1080,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "720p" | "720" => Ok(Resolution::Hd720),
            "1080p" | "1080" => Ok(Resolution::Hd1080),
            other => Err(format!("unknown resolution: {other}")),
        }
    }
}

/// Target aspect ratio of the rendered video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum AspectRatio {
    #[serde(rename = "16:9")]
    Landscape,
    #[default]
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "1:1")]
    Square,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Square => "1:1",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "16:9" => Ok(AspectRatio::Landscape),
            "9:16" => Ok(AspectRatio::Portrait),
            "1:1" => Ok(AspectRatio::Square),
            other => Err(format!("unknown aspect ratio: {other}")),
        }
    }
}

/// Parameters of a single video generation, opaque to the queue and
/// interpreted only by the provider adapters.
///
/// Validated at the API boundary; a payload that fails validation is a
/// terminal, non-retryable error and never reaches a worker.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
pub struct GenerationRequest {
    /// Text prompt driving the generation
    #[validate(length(min = 1, max = 2000))]
    pub prompt: String,

    /// Requested clip length in seconds
    #[validate(range(min = 1, max = 30))]
    pub duration_secs: u32,

    /// Output resolution
    #[serde(default)]
    pub resolution: Resolution,

    /// Target aspect ratio
    #[serde(default)]
    pub aspect_ratio: AspectRatio,

    /// Things the model should avoid rendering
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 1000))]
    pub negative_prompt: Option<String>,

    /// Seed for reproducible generations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,

    /// Optional first-frame image for image-to-video
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(url)]
    pub init_image_url: Option<String>,
}

impl GenerationRequest {
    /// Create a minimal request with defaults for everything but the prompt.
    pub fn new(prompt: impl Into<String>, duration_secs: u32) -> Self {
        Self {
            prompt: prompt.into(),
            duration_secs,
            resolution: Resolution::default(),
            aspect_ratio: AspectRatio::default(),
            negative_prompt: None,
            seed: None,
            init_image_url: None,
        }
    }

    /// Set the resolution.
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Set the aspect ratio.
    pub fn with_aspect_ratio(mut self, aspect: AspectRatio) -> Self {
        self.aspect_ratio = aspect;
        self
    }

    /// Set the init image for image-to-video.
    pub fn with_init_image(mut self, url: impl Into<String>) -> Self {
        self.init_image_url = Some(url.into());
        self
    }
}
