use std::sync::Arc;

use tracing::{info_span, warn, Instrument};

use super::{
    ErrorKind, GenerationProvider, ProviderArtifact, ProviderError, ProviderRequest,
};
use crate::model::MediaType;
use crate::retry::{retry_with_schedule, RetrySchedule};

/// Uniform entry point for all providers.
///
/// Rate-limit and server errors are retried on the configured schedule.
/// Every other kind surfaces on the first attempt. An empty payload is a
/// non-retryable `Malformed` failure.
#[derive(Clone)]
pub struct ProviderClient {
    image: Arc<dyn GenerationProvider>,
    video: Arc<dyn GenerationProvider>,
    retry: RetrySchedule,
}

impl ProviderClient {
    pub fn new(
        image: Arc<dyn GenerationProvider>,
        video: Arc<dyn GenerationProvider>,
        retry: RetrySchedule,
    ) -> Self {
        Self {
            image,
            video,
            retry,
        }
    }

    pub fn retry_schedule(&self) -> &RetrySchedule {
        &self.retry
    }

    fn provider_for(&self, media_type: MediaType) -> &Arc<dyn GenerationProvider> {
        match media_type {
            MediaType::Image => &self.image,
            MediaType::Video => &self.video,
        }
    }

    pub async fn generate(
        &self,
        request: &ProviderRequest,
    ) -> Result<ProviderArtifact, ProviderError> {
        let provider = self.provider_for(request.media_type);
        let span = info_span!(
            "provider_call",
            provider = provider.name(),
            model = %request.model,
            variation_index = request.variation_index,
        );

        retry_with_schedule(
            &self.retry,
            ProviderError::is_retryable,
            |attempt| {
                let provider = provider.clone();
                async move {
                    let result = provider.generate(request).await.and_then(check_payload);
                    if let Err(e) = &result {
                        warn!(attempt, kind = %e.kind, error = %e.message, "provider call failed");
                    }
                    result
                }
            },
        )
        .instrument(span)
        .await
    }
}

fn check_payload(artifact: ProviderArtifact) -> Result<ProviderArtifact, ProviderError> {
    if artifact.bytes.is_empty() {
        return Err(ProviderError::new(
            ErrorKind::Malformed,
            "provider returned an empty payload",
        ));
    }
    Ok(artifact)
}
