//! Shared request template: validated once per invocation and reused for
//! every unit of the job.

use base64::Engine;
use tracing::{debug, info_span, Instrument};

use crate::derivative::AssetBuilder;
use crate::model::{GenerationJob, MediaType};
use crate::provider::{ProviderRequest, ReferenceImage};
use crate::sanitize::redact_object_path;
use crate::storage::StorageGateway;

use super::config::WorkerSettings;
use super::error::WorkerError;

pub const IMAGE_ASPECT_RATIOS: &[&str] = &[
    "1:1", "2:3", "3:2", "3:4", "4:3", "4:5", "5:4", "9:16", "16:9", "21:9",
];
pub const IMAGE_RESOLUTIONS: &[&str] = &["1K", "2K", "4K"];
pub const VIDEO_ASPECT_RATIOS: &[&str] = &["16:9", "9:16"];
pub const VIDEO_RESOLUTIONS: &[&str] = &["720p", "1080p"];
pub const VIDEO_DURATION_SECONDS: std::ops::RangeInclusive<u32> = 4..=8;
pub const MAX_IMAGE_REFERENCES: usize = 3;
pub const MAX_VIDEO_REFERENCES: usize = 1;

const DEFAULT_VIDEO_ASPECT: &str = "16:9";
const DEFAULT_VIDEO_RESOLUTION: &str = "720p";
const DEFAULT_VIDEO_DURATION: u32 = 8;

#[derive(Debug, Clone)]
pub struct RequestTemplate {
    pub media_type: MediaType,
    pub model: String,
    pub prompt: String,
    pub aspect_ratio: Option<String>,
    pub resolution: Option<String>,
    pub duration_seconds: Option<u32>,
    pub generate_audio: bool,
    pub references: Vec<ReferenceImage>,
}

impl RequestTemplate {
    /// Validates the job's parameters and loads its reference images.
    pub async fn prepare(
        job: &GenerationJob,
        settings: &WorkerSettings,
        storage: &dyn StorageGateway,
        assets: &AssetBuilder,
    ) -> Result<Self, WorkerError> {
        let mut template = Self::validate(job, settings)?;
        template.references = load_references(&job.reference_paths, storage, assets)
            .instrument(info_span!("load_references", count = job.reference_paths.len()))
            .await?;
        Ok(template)
    }

    /// Parameter checks only. References are left empty.
    pub fn validate(job: &GenerationJob, settings: &WorkerSettings) -> Result<Self, WorkerError> {
        let prompt = job.prompt.trim();
        if prompt.is_empty() {
            return Err(invalid("prompt is empty"));
        }
        if job.variation_count == 0 || job.variation_count > settings.max_variations {
            return Err(invalid(format!(
                "variation_count must be between 1 and {}, got {}",
                settings.max_variations, job.variation_count
            )));
        }

        let params = &job.parameters;
        let model = params
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| settings.default_model(job.job_type))
            .to_string();
        if model.is_empty() {
            return Err(invalid("no model configured"));
        }

        let (aspect_ratio, resolution, duration_seconds, generate_audio, max_refs) =
            match job.job_type {
                MediaType::Image => {
                    check_allowed("aspect_ratio", params.aspect_ratio.as_deref(), IMAGE_ASPECT_RATIOS)?;
                    check_allowed("resolution", params.resolution.as_deref(), IMAGE_RESOLUTIONS)?;
                    if params.duration_seconds.is_some() {
                        return Err(invalid("duration_seconds is only valid for video jobs"));
                    }
                    (
                        params.aspect_ratio.clone(),
                        params.resolution.clone(),
                        None,
                        false,
                        MAX_IMAGE_REFERENCES,
                    )
                }
                MediaType::Video => {
                    check_allowed("aspect_ratio", params.aspect_ratio.as_deref(), VIDEO_ASPECT_RATIOS)?;
                    check_allowed("resolution", params.resolution.as_deref(), VIDEO_RESOLUTIONS)?;
                    let duration = params.duration_seconds.unwrap_or(DEFAULT_VIDEO_DURATION);
                    if !VIDEO_DURATION_SECONDS.contains(&duration) {
                        return Err(invalid(format!(
                            "duration_seconds must be between {} and {}, got {}",
                            VIDEO_DURATION_SECONDS.start(),
                            VIDEO_DURATION_SECONDS.end(),
                            duration
                        )));
                    }
                    (
                        Some(
                            params
                                .aspect_ratio
                                .clone()
                                .unwrap_or_else(|| DEFAULT_VIDEO_ASPECT.to_string()),
                        ),
                        Some(
                            params
                                .resolution
                                .clone()
                                .unwrap_or_else(|| DEFAULT_VIDEO_RESOLUTION.to_string()),
                        ),
                        Some(duration),
                        params.generate_audio,
                        MAX_VIDEO_REFERENCES,
                    )
                }
            };

        if job.reference_paths.len() > max_refs {
            return Err(invalid(format!(
                "{} jobs accept at most {} reference images, got {}",
                job.job_type,
                max_refs,
                job.reference_paths.len()
            )));
        }

        Ok(Self {
            media_type: job.job_type,
            model,
            prompt: prompt.to_string(),
            aspect_ratio,
            resolution,
            duration_seconds,
            generate_audio,
            references: Vec::new(),
        })
    }

    /// Request for one unit. References are shared, not copied.
    pub fn request_for(&self, variation_index: u32) -> ProviderRequest {
        ProviderRequest {
            media_type: self.media_type,
            model: self.model.clone(),
            prompt: self.prompt.clone(),
            aspect_ratio: self.aspect_ratio.clone(),
            resolution: self.resolution.clone(),
            duration_seconds: self.duration_seconds,
            generate_audio: self.generate_audio,
            references: self.references.clone(),
            variation_index,
        }
    }
}

async fn load_references(
    paths: &[String],
    storage: &dyn StorageGateway,
    assets: &AssetBuilder,
) -> Result<Vec<ReferenceImage>, WorkerError> {
    let mut references = Vec::with_capacity(paths.len());
    for path in paths {
        let reference_error = |reason: String| WorkerError::Reference {
            path: path.clone(),
            reason,
        };

        let bytes = storage
            .download(path)
            .await
            .map_err(|e| reference_error(e.to_string()))?;
        let mime_type = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string();
        let compressed = assets
            .compress_if_oversized_async(bytes, mime_type)
            .await
            .map_err(|e| reference_error(e.to_string()))?;

        debug!(
            reference = %redact_object_path(path),
            changed = compressed.changed,
            original_size = compressed.original_size,
            compressed_size = compressed.compressed_size,
            "reference loaded"
        );

        let encoded = base64::engine::general_purpose::STANDARD.encode(&compressed.bytes);
        references.push(ReferenceImage {
            mime_type: compressed.mime_type,
            data_base64: encoded.into(),
        });
    }
    Ok(references)
}

fn check_allowed(field: &str, value: Option<&str>, allowed: &[&str]) -> Result<(), WorkerError> {
    match value {
        Some(v) if !allowed.contains(&v) => Err(invalid(format!(
            "unsupported {} '{}' (allowed: {})",
            field,
            v,
            allowed.join(", ")
        ))),
        _ => Ok(()),
    }
}

fn invalid(message: impl Into<String>) -> WorkerError {
    WorkerError::InvalidRequest(message.into())
}
