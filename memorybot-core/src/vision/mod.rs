pub mod gemini;

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::provider::ProviderError;

/// Structured metadata produced by image analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    #[serde(default)]
    pub detected_objects: Vec<String>,
    #[serde(default)]
    pub color_palette: Vec<String>,
    #[serde(default)]
    pub potential_use_cases: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Errors that can occur while describing or analyzing an image.
#[derive(Debug)]
pub enum VisionError {
    /// The model service failed.
    Service(ProviderError),
    /// The model answered, but not in the expected shape.
    MalformedResponse(String),
}

impl VisionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Service(e) if e.is_retryable())
    }
}

impl fmt::Display for VisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service(e) => write!(f, "vision service error: {e}"),
            Self::MalformedResponse(msg) => write!(f, "malformed vision response: {msg}"),
        }
    }
}

impl std::error::Error for VisionError {}

impl From<ProviderError> for VisionError {
    fn from(e: ProviderError) -> Self {
        Self::Service(e)
    }
}

/// Boxed future returned by the vision traits, keeping them dyn-compatible.
pub type VisionFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, VisionError>> + Send + 'a>>;

/// Maps an image to structured metadata written in `language`.
pub trait MetadataAnalyzer: Send + Sync {
    fn analyze<'a>(&'a self, image: &'a Path, language: &'a str) -> VisionFuture<'a, ImageMetadata>;
}

/// Maps an image to a one-paragraph free-text description.
pub trait ImageDescriber: Send + Sync {
    fn describe<'a>(&'a self, image: &'a Path) -> VisionFuture<'a, String>;
}
