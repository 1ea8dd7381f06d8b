use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use mediagen::model::{ApprovalStatus, JobStatus, MediaType};
use mediagen::{JobOutcome, RetryReset};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RetryQuery {
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Serialize)]
pub struct RetryResponse {
    pub job_id: String,
    /// `processed` when run inline, `queued` when dispatched.
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<JobOutcome>,
}

/// `POST /api/jobs/{id}/retry`: resets a failed job and runs it again.
pub async fn retry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
    Query(query): Query<RetryQuery>,
) -> AppResult<Response> {
    state.auth.authorize(&headers)?;

    match state.worker.repository().reset_for_retry(&job_id).await? {
        RetryReset::Reset { removed_paths } => {
            info!(%job_id, removed = removed_paths.len(), "job reset for retry");
            if !removed_paths.is_empty() {
                if let Err(e) = state.worker.storage().delete(&removed_paths).await {
                    warn!(%job_id, error = %e, "failed to delete objects of reset job");
                }
            }
        }
        RetryReset::NotRetryable(status) => {
            return Err(AppError::conflict(format!(
                "Job {} is {} and cannot be retried",
                job_id, status
            )));
        }
        RetryReset::NotFound => {
            return Err(AppError::not_found(format!("Job not found: {}", job_id)));
        }
    }

    if query.inline {
        let outcome = state.worker.process_job(&job_id, state.run_options).await?;
        return Ok(Json(RetryResponse {
            job_id,
            status: "processed",
            outcome: Some(outcome),
        })
        .into_response());
    }

    // The ticket is dropped; the dispatcher logs the outcome.
    state.dispatcher.submit(job_id.clone(), state.run_options)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(RetryResponse {
            job_id,
            status: "queued",
            outcome: None,
        }),
    )
        .into_response())
}

#[derive(Debug, Serialize)]
pub struct UnitView {
    pub id: String,
    pub variation_index: u32,
    pub media_type: MediaType,
    pub mime_type: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_seconds: Option<u32>,
    pub file_size: u64,
    pub approval_status: ApprovalStatus,
    pub original_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub preview_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct UnitsResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub completed_count: u32,
    pub failed_count: u32,
    pub variation_count: u32,
    pub units: Vec<UnitView>,
    pub urls_expire_at: Option<DateTime<Utc>>,
}

/// `GET /api/jobs/{id}/units`: stored units with signed URLs, issued in
/// one batch.
pub async fn units(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> AppResult<Json<UnitsResponse>> {
    state.auth.authorize(&headers)?;

    let repo = state.worker.repository();
    let job = repo
        .get_job(&job_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Job not found: {}", job_id)))?;
    let units = repo.list_units(&job_id).await?;

    let paths: Vec<String> = units.iter().flat_map(|u| u.object_paths()).collect();
    let signed = state
        .worker
        .storage()
        .signed_urls(&paths, state.signed_url_ttl)
        .await?;
    let urls_expire_at = signed.iter().map(|s| s.expires_at).min();
    let by_path: HashMap<String, String> = signed.into_iter().map(|s| (s.path, s.url)).collect();
    let url_for = |path: Option<&String>| path.and_then(|p| by_path.get(p).cloned());

    let units = units
        .into_iter()
        .map(|unit| UnitView {
            original_url: url_for(Some(&unit.original_path)),
            thumbnail_url: url_for(unit.thumbnail_path.as_ref()),
            preview_url: url_for(unit.preview_path.as_ref()),
            id: unit.id,
            variation_index: unit.variation_index,
            media_type: unit.media_type,
            mime_type: unit.mime_type,
            width: unit.width,
            height: unit.height,
            duration_seconds: unit.duration_seconds,
            file_size: unit.file_size,
            approval_status: unit.approval_status,
            created_at: unit.created_at,
        })
        .collect();

    Ok(Json(UnitsResponse {
        job_id: job.id,
        status: job.status,
        completed_count: job.completed_count,
        failed_count: job.failed_count,
        variation_count: job.variation_count,
        units,
        urls_expire_at,
    }))
}
