//! Video generation over a long-running-operation HTTP API.
//!
//! Submit with `predictLongRunning`, poll the returned operation until it
//! is done, then download the first generated sample.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use super::{ErrorKind, GenerationProvider, ProviderArtifact, ProviderError, ProviderRequest};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_VIDEO_MIME: &str = "video/mp4";

pub struct HttpVideoProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    poll_interval: Duration,
    max_wait: Duration,
}

impl HttpVideoProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        request_timeout: Duration,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .map_err(ProviderError::from)?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            poll_interval,
            max_wait,
        })
    }

    async fn submit(&self, request: &ProviderRequest) -> Result<String, ProviderError> {
        let url = format!(
            "{}/models/{}:predictLongRunning",
            self.base_url, request.model
        );
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&build_body(request))
            .send()
            .await?;
        let operation: Operation = read_json(response).await?;
        if let Some(error) = operation.error {
            return Err(error.into_provider_error());
        }
        operation
            .name
            .ok_or_else(|| ProviderError::malformed("operation has no name"))
    }

    async fn poll(&self, name: &str) -> Result<GenerateVideoResponse, ProviderError> {
        let url = format!("{}/{}", self.base_url, name.trim_start_matches('/'));
        let deadline = Instant::now() + self.max_wait;

        loop {
            let response = self
                .client
                .get(&url)
                .header("x-goog-api-key", self.api_key.expose_secret())
                .send()
                .await?;
            let operation: Operation = read_json(response).await?;

            if let Some(error) = operation.error {
                return Err(error.into_provider_error());
            }
            if operation.done {
                return operation
                    .response
                    .map(|r| r.generate_video_response)
                    .ok_or_else(|| ProviderError::malformed("finished operation has no response"));
            }
            if Instant::now() + self.poll_interval > deadline {
                return Err(ProviderError::new(
                    ErrorKind::Unknown,
                    format!("operation {} not done after {:?}", name, self.max_wait),
                ));
            }
            debug!(operation = name, "video operation still running");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn download(&self, uri: &str) -> Result<ProviderArtifact, ProviderError> {
        let response = self
            .client
            .get(uri)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_response(status.as_u16(), &body));
        }
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("video/"))
            .unwrap_or(DEFAULT_VIDEO_MIME)
            .to_string();
        let bytes = response.bytes().await?.to_vec();
        Ok(ProviderArtifact { bytes, mime_type })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictRequest<'a> {
    instances: [Instance<'a>; 1],
    parameters: VideoParameters<'a>,
}

#[derive(Serialize)]
struct Instance<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<InstanceImage<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InstanceImage<'a> {
    bytes_base64_encoded: &'a str,
    mime_type: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoParameters<'a> {
    sample_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    aspect_ratio: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolution: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_seconds: Option<u32>,
    generate_audio: bool,
}

#[derive(Deserialize)]
struct Operation {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<OperationError>,
    #[serde(default)]
    response: Option<OperationResponse>,
}

#[derive(Deserialize)]
struct OperationError {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: String,
}

impl OperationError {
    fn into_provider_error(self) -> ProviderError {
        let status = self.status.unwrap_or_default();
        ProviderError::new(
            ErrorKind::from_rpc_status(&status, &self.message),
            format!("{}: {}", status, self.message),
        )
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    #[serde(default)]
    generate_video_response: GenerateVideoResponse,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateVideoResponse {
    #[serde(default)]
    generated_samples: Vec<GeneratedSample>,
    #[serde(default)]
    rai_media_filtered_count: u32,
    #[serde(default)]
    rai_media_filtered_reasons: Vec<String>,
}

#[derive(Deserialize)]
struct GeneratedSample {
    video: SampleVideo,
}

#[derive(Deserialize)]
struct SampleVideo {
    uri: String,
}

fn build_body(request: &ProviderRequest) -> PredictRequest<'_> {
    // The video API takes a single conditioning image.
    let image = request.references.first().map(|r| InstanceImage {
        bytes_base64_encoded: &r.data_base64,
        mime_type: &r.mime_type,
    });
    PredictRequest {
        instances: [Instance {
            prompt: &request.prompt,
            image,
        }],
        parameters: VideoParameters {
            sample_count: 1,
            aspect_ratio: request.aspect_ratio.as_deref(),
            resolution: request.resolution.as_deref(),
            duration_seconds: request.duration_seconds,
            generate_audio: request.generate_audio,
        },
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ProviderError::from_response(status.as_u16(), &body));
    }
    serde_json::from_str(&body)
        .map_err(|e| ProviderError::malformed(format!("invalid response JSON: {}", e)))
}

fn first_sample_uri(response: GenerateVideoResponse) -> Result<String, ProviderError> {
    match response.generated_samples.into_iter().next() {
        Some(sample) => Ok(sample.video.uri),
        None if response.rai_media_filtered_count > 0 => Err(ProviderError::blocked(format!(
            "video filtered: {}",
            response.rai_media_filtered_reasons.join("; ")
        ))),
        None => Err(ProviderError::malformed("operation produced no samples")),
    }
}

#[async_trait]
impl GenerationProvider for HttpVideoProvider {
    fn name(&self) -> &str {
        "video-api"
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderArtifact, ProviderError> {
        let operation = self.submit(request).await?;
        debug!(operation = %operation, "video operation submitted");
        let result = self.poll(&operation).await?;
        let uri = first_sample_uri(result)?;
        self.download(&uri).await
    }
}
