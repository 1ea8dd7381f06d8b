//! Image generation over a `generateContent` style HTTP API.
//!
//! The prompt and reference images are sent as content parts. The image
//! comes back as base64 inline data in the first candidate.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{GenerationProvider, ProviderArtifact, ProviderError, ProviderRequest};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Finish reasons that mean the output was withheld for policy reasons.
const BLOCKED_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "IMAGE_SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
    "RECITATION",
];

pub struct HttpImageProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

impl HttpImageProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        request_timeout: Duration,
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
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text {
        text: &'a str,
    },
    #[serde(rename_all = "camelCase")]
    Inline {
        inline_data: InlineDataRef<'a>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineDataRef<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: [&'static str; 1],
    #[serde(skip_serializing_if = "ImageConfig::is_empty")]
    image_config: ImageConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    aspect_ratio: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_size: Option<&'a str>,
}

impl ImageConfig<'_> {
    fn is_empty(&self) -> bool {
        self.aspect_ratio.is_none() && self.image_size.is_none()
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

fn build_body(request: &ProviderRequest) -> GenerateContentRequest<'_> {
    let mut parts = vec![RequestPart::Text {
        text: &request.prompt,
    }];
    parts.extend(request.references.iter().map(|r| RequestPart::Inline {
        inline_data: InlineDataRef {
            mime_type: &r.mime_type,
            data: &r.data_base64,
        },
    }));

    GenerateContentRequest {
        contents: vec![Content {
            role: "user",
            parts,
        }],
        generation_config: GenerationConfig {
            response_modalities: ["IMAGE"],
            image_config: ImageConfig {
                aspect_ratio: request.aspect_ratio.as_deref(),
                image_size: request.resolution.as_deref(),
            },
        },
    }
}

fn extract_image(response: GenerateContentResponse) -> Result<ProviderArtifact, ProviderError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ProviderError::blocked(format!("prompt blocked: {}", reason)));
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::malformed("response has no candidates"))?;

    let inline = candidate
        .content
        .into_iter()
        .flat_map(|c| c.parts)
        .find_map(|p| p.inline_data);

    match (inline, candidate.finish_reason) {
        (Some(data), _) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(data.data.as_bytes())
                .map_err(|e| ProviderError::malformed(format!("invalid base64 image: {}", e)))?;
            Ok(ProviderArtifact {
                bytes,
                mime_type: data.mime_type,
            })
        }
        (None, Some(reason)) if BLOCKED_FINISH_REASONS.contains(&reason.as_str()) => Err(
            ProviderError::blocked(format!("generation stopped: {}", reason)),
        ),
        (None, reason) => Err(ProviderError::malformed(format!(
            "response has no image data (finish reason: {})",
            reason.as_deref().unwrap_or("none")
        ))),
    }
}

#[async_trait]
impl GenerationProvider for HttpImageProvider {
    fn name(&self) -> &str {
        "image-api"
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderArtifact, ProviderError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, request.model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&build_body(request))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::from_response(status.as_u16(), &body));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::malformed(format!("invalid response JSON: {}", e)))?;
        extract_image(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MediaType;
    use crate::provider::{ErrorKind, ReferenceImage};
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ProviderRequest {
        ProviderRequest {
            media_type: MediaType::Image,
            model: "image-model-1".into(),
            prompt: "a ceramic mug on oak".into(),
            aspect_ratio: Some("4:5".into()),
            resolution: None,
            duration_seconds: None,
            generate_audio: false,
            references: vec![ReferenceImage {
                mime_type: "image/jpeg".into(),
                data_base64: Arc::from("cmVm"),
            }],
            variation_index: 2,
        }
    }

    fn provider(server: &MockServer) -> HttpImageProvider {
        HttpImageProvider::new(
            server.uri(),
            SecretString::from("test-key"),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_body_shape() {
        let req = request();
        let body = serde_json::to_value(build_body(&req)).unwrap();
        assert_eq!(body["contents"][0]["parts"][0]["text"], "a ceramic mug on oak");
        assert_eq!(
            body["contents"][0]["parts"][1]["inlineData"]["mimeType"],
            "image/jpeg"
        );
        assert_eq!(body["generationConfig"]["imageConfig"]["aspectRatio"], "4:5");
        assert!(body["generationConfig"]["imageConfig"].get("imageSize").is_none());
    }

    #[tokio::test]
    async fn test_generate_decodes_inline_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/image-model-1:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({
                "generationConfig": {"responseModalities": ["IMAGE"]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"parts": [
                        {"text": "here you go"},
                        {"inlineData": {"mimeType": "image/png", "data": "iVBORw=="}}
                    ]},
                    "finishReason": "STOP"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let artifact = provider(&server).generate(&request()).await.unwrap();
        assert_eq!(artifact.mime_type, "image/png");
        assert_eq!(artifact.bytes, vec![0x89, 0x50, 0x4e, 0x47]);
    }

    #[tokio::test]
    async fn test_prompt_block_is_content_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "promptFeedback": {"blockReason": "SAFETY"}
            })))
            .mount(&server)
            .await;

        let err = provider(&server).generate(&request()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ContentBlocked);
    }

    #[tokio::test]
    async fn test_safety_finish_without_image_is_content_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"finishReason": "IMAGE_SAFETY"}]
            })))
            .mount(&server)
            .await;

        let err = provider(&server).generate(&request()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ContentBlocked);
    }

    #[tokio::test]
    async fn test_text_only_response_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "no"}]}, "finishReason": "STOP"}]
            })))
            .mount(&server)
            .await;

        let err = provider(&server).generate(&request()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Malformed);
    }

    #[tokio::test]
    async fn test_http_status_classification() {
        for (status, kind) in [
            (429, ErrorKind::RateLimited),
            (503, ErrorKind::ServerError),
            (403, ErrorKind::AccessDenied),
            (404, ErrorKind::NotFound),
        ] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
                .mount(&server)
                .await;

            let err = provider(&server).generate(&request()).await.unwrap_err();
            assert_eq!(err.kind, kind, "status {}", status);
            assert_eq!(err.status, Some(status));
        }
    }

    #[tokio::test]
    async fn test_invalid_json_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = provider(&server).generate(&request()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Malformed);
    }
}
