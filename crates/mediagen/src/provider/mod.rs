//! Generative media providers.
//!
//! [`GenerationProvider`] is one remote backend (image or video).
//! [`ProviderClient`] adds dispatch by media type, the retry schedule and
//! payload checks on top.

use std::sync::Arc;

use async_trait::async_trait;

pub mod client;
pub mod error;
pub mod image_api;
pub mod video_api;

pub use client::ProviderClient;
pub use error::{ErrorKind, ProviderError};
pub use image_api::HttpImageProvider;
pub use video_api::HttpVideoProvider;

use crate::model::MediaType;

/// A reference image already compressed and base64-encoded for the wire.
/// Shared by every unit of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub mime_type: String,
    pub data_base64: Arc<str>,
}

/// One call to a generation provider.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub media_type: MediaType,
    pub model: String,
    pub prompt: String,
    pub aspect_ratio: Option<String>,
    pub resolution: Option<String>,
    pub duration_seconds: Option<u32>,
    pub generate_audio: bool,
    pub references: Vec<ReferenceImage>,
    pub variation_index: u32,
}

/// Raw result of a successful call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderArtifact {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderArtifact, ProviderError>;
}
