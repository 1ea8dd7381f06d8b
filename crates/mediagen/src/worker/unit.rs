//! One unit of work: generate, derive, upload, record.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info_span, warn, Instrument};

use crate::db::DatabaseError;
use crate::derivative::{AssetBuilder, DerivativeSet};
use crate::error::StorageError;
use crate::model::{ApprovalStatus, GeneratedUnit, JobCounters, MediaType};
use crate::provider::{ProviderArtifact, ProviderClient};
use crate::repository::{Claim, JobRepository, UnitRecord};
use crate::retry::{retry_with_schedule, RetrySchedule};
use crate::storage::StorageGateway;

use super::config::WorkerSettings;
use super::progress::{ProgressEvent, ProgressReporter};
use super::request::RequestTemplate;

/// Everything a unit needs, borrowed from the running job.
pub(crate) struct UnitContext<'a> {
    pub repo: &'a dyn JobRepository,
    pub storage: &'a dyn StorageGateway,
    pub provider: &'a ProviderClient,
    pub assets: &'a AssetBuilder,
    pub settings: &'a WorkerSettings,
    pub progress: &'a dyn ProgressReporter,
    pub claim: &'a Claim,
    pub template: &'a RequestTemplate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum UnitResult {
    /// Stored and counted.
    Succeeded(JobCounters),
    /// Counted as failed. `None` when the failure itself could not be
    /// recorded, which leaves the index due for the next invocation.
    Failed(Option<JobCounters>),
    /// Not counted: another invocation already stored this index or the
    /// job is fully accounted for.
    Skipped,
    ClaimLost,
}

/// Objects uploaded for one unit, in upload order.
struct StagedObjects {
    original: String,
    thumbnail: Option<String>,
    preview: Option<String>,
}

impl StagedObjects {
    fn paths(&self) -> Vec<String> {
        let mut paths = vec![self.original.clone()];
        paths.extend(self.thumbnail.iter().cloned());
        paths.extend(self.preview.iter().cloned());
        paths
    }
}

pub(crate) async fn run_unit(ctx: &UnitContext<'_>, variation_index: u32) -> UnitResult {
    let span = info_span!(
        "unit",
        job_id = %ctx.claim.job_id,
        variation_index,
    );
    run_unit_inner(ctx, variation_index).instrument(span).await
}

async fn run_unit_inner(ctx: &UnitContext<'_>, variation_index: u32) -> UnitResult {
    let request = ctx.template.request_for(variation_index);
    let artifact = match ctx.provider.generate(&request).await {
        Ok(artifact) => artifact,
        Err(e) => return record_failure(ctx, variation_index, e.to_string()).await,
    };

    let (artifact, derivatives) = match ctx.template.media_type {
        MediaType::Video => (artifact, None),
        MediaType::Image => {
            let ProviderArtifact { bytes, mime_type } = artifact;
            let bytes = Arc::new(bytes);
            match ctx.assets.build_derivatives_async(Arc::clone(&bytes)).await {
                Ok(set) => {
                    let bytes = Arc::try_unwrap(bytes).unwrap_or_else(|shared| (*shared).clone());
                    (ProviderArtifact { bytes, mime_type }, Some(set))
                }
                Err(e) => {
                    return record_failure(
                        ctx,
                        variation_index,
                        format!("derivative build failed: {}", e),
                    )
                    .await
                }
            }
        }
    };

    store_unit(ctx, variation_index, artifact, derivatives).await
}

async fn store_unit(
    ctx: &UnitContext<'_>,
    variation_index: u32,
    artifact: ProviderArtifact,
    derivatives: Option<DerivativeSet>,
) -> UnitResult {
    let unit_id = uuid::Uuid::new_v4().to_string();
    let base = format!(
        "{}/{}/{}-{}",
        ctx.settings.key_prefix, ctx.claim.job_id, variation_index, unit_id
    );
    let staged = StagedObjects {
        original: format!("{}/original.{}", base, extension_for(&artifact.mime_type)),
        thumbnail: derivatives.as_ref().map(|_| format!("{}/thumbnail.jpg", base)),
        preview: derivatives.as_ref().map(|_| format!("{}/preview.jpg", base)),
    };

    let file_size = artifact.bytes.len() as u64;
    let (width, height) = match &derivatives {
        Some(set) => (Some(set.original_width), Some(set.original_height)),
        None => (None, None),
    };

    if let Err(e) = upload_all(ctx, &staged, artifact.bytes, &artifact.mime_type, derivatives).await
    {
        discard(ctx, &staged).await;
        return record_failure(
            ctx,
            variation_index,
            format!("failed to store artifact: {}", e),
        )
        .await;
    }

    let unit = GeneratedUnit {
        id: unit_id,
        job_id: ctx.claim.job_id.clone(),
        variation_index,
        media_type: ctx.template.media_type,
        mime_type: artifact.mime_type,
        original_path: staged.original.clone(),
        thumbnail_path: staged.thumbnail.clone(),
        preview_path: staged.preview.clone(),
        width,
        height,
        duration_seconds: ctx.template.duration_seconds,
        file_size,
        approval_status: ApprovalStatus::Pending,
        created_at: Utc::now(),
    };

    let mut saw_error = false;
    let recorded = retry_with_schedule(
        &persist_schedule(ctx.settings),
        |_: &DatabaseError| true,
        |attempt| {
            if attempt > 1 {
                saw_error = true;
            }
            ctx.repo.record_unit_success(ctx.claim, &unit)
        },
    )
    .await;

    match recorded {
        Ok(UnitRecord::Recorded(counters)) => {
            ctx.progress.report(ProgressEvent::UnitSucceeded {
                job_id: ctx.claim.job_id.clone(),
                variation_index,
                counters,
            });
            UnitResult::Succeeded(counters)
        }
        Ok(UnitRecord::Duplicate | UnitRecord::Exhausted) if saw_error => {
            // An earlier attempt may have committed before its error surfaced.
            match already_stored(ctx, &unit).await {
                Ok(Some(counters)) => {
                    ctx.progress.report(ProgressEvent::UnitSucceeded {
                        job_id: ctx.claim.job_id.clone(),
                        variation_index,
                        counters,
                    });
                    UnitResult::Succeeded(counters)
                }
                Ok(None) => {
                    discard(ctx, &staged).await;
                    UnitResult::Skipped
                }
                Err(e) => {
                    // The row may reference these objects; keep them.
                    warn!(error = %e, unit_id = %unit.id, "cannot tell whether unit was stored, keeping artifact");
                    UnitResult::Skipped
                }
            }
        }
        Ok(UnitRecord::Duplicate | UnitRecord::Exhausted) => {
            debug!("unit not counted, discarding artifact");
            discard(ctx, &staged).await;
            UnitResult::Skipped
        }
        Ok(UnitRecord::ClaimLost) => {
            discard(ctx, &staged).await;
            UnitResult::ClaimLost
        }
        Err(e) => {
            discard(ctx, &staged).await;
            record_failure(ctx, variation_index, format!("failed to persist unit: {}", e)).await
        }
    }
}

async fn upload_all(
    ctx: &UnitContext<'_>,
    staged: &StagedObjects,
    original: Vec<u8>,
    mime_type: &str,
    derivatives: Option<DerivativeSet>,
) -> Result<(), StorageError> {
    let mut uploads: Vec<(&str, Vec<u8>, &str)> = vec![(staged.original.as_str(), original, mime_type)];
    if let (Some(set), Some(thumb_path), Some(preview_path)) =
        (derivatives, staged.thumbnail.as_deref(), staged.preview.as_deref())
    {
        uploads.push((thumb_path, set.thumbnail.bytes, set.thumbnail.mime_type));
        uploads.push((preview_path, set.preview.bytes, set.preview.mime_type));
    }

    let schedule = persist_schedule(ctx.settings);
    for (path, bytes, content_type) in uploads {
        retry_with_schedule(
            &schedule,
            |_: &StorageError| true,
            |_| ctx.storage.upload(path, bytes.clone(), content_type),
        )
        .await?;
    }
    Ok(())
}

async fn record_failure(ctx: &UnitContext<'_>, variation_index: u32, message: String) -> UnitResult {
    let recorded = retry_with_schedule(
        &persist_schedule(ctx.settings),
        |_: &DatabaseError| true,
        |_| ctx.repo.record_unit_failure(ctx.claim, &message),
    )
    .await;

    let (result, counters) = match recorded {
        Ok(UnitRecord::Recorded(counters)) => (UnitResult::Failed(Some(counters)), Some(counters)),
        Ok(UnitRecord::ClaimLost) => return UnitResult::ClaimLost,
        Ok(UnitRecord::Duplicate) | Ok(UnitRecord::Exhausted) => return UnitResult::Skipped,
        Err(e) => {
            error!(error = %e, "could not record unit failure");
            (UnitResult::Failed(None), None)
        }
    };

    ctx.progress.report(ProgressEvent::UnitFailed {
        job_id: ctx.claim.job_id.clone(),
        variation_index,
        error: message,
        counters,
    });
    result
}

/// Counters when `unit` is already stored under its own id.
async fn already_stored(
    ctx: &UnitContext<'_>,
    unit: &GeneratedUnit,
) -> Result<Option<JobCounters>, DatabaseError> {
    let units = ctx.repo.list_units(&unit.job_id).await?;
    if !units.iter().any(|u| u.id == unit.id) {
        return Ok(None);
    }
    let job = ctx.repo.get_job(&unit.job_id).await?;
    Ok(job.map(|job| job.counters()))
}

async fn discard(ctx: &UnitContext<'_>, staged: &StagedObjects) {
    if let Err(e) = ctx.storage.delete(&staged.paths()).await {
        warn!(error = %e, "failed to delete discarded artifact");
    }
}

fn persist_schedule(settings: &WorkerSettings) -> RetrySchedule {
    RetrySchedule::fixed(
        settings.persist_attempts.saturating_sub(1),
        settings.persist_retry_delay,
    )
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        _ => "bin",
    }
}
