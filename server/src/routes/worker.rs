use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use mediagen::worker::config::MAX_JOBS_PER_RUN;
use mediagen::JobOutcome;

use crate::error::AppResult;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct WorkerQuery {
    pub job_id: Option<String>,
    pub batch_size: Option<usize>,
    pub parallelism: Option<usize>,
    pub jobs: Option<usize>,
    pub time_budget_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct WorkerResponse {
    pub processed: usize,
    pub jobs: Vec<JobOutcome>,
}

/// `GET /api/worker`: processes one job, or a batch of due jobs.
pub async fn trigger(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WorkerQuery>,
) -> AppResult<Json<WorkerResponse>> {
    state.auth.authorize(&headers)?;

    let options = state
        .run_options
        .with_overrides(query.batch_size, query.parallelism, query.time_budget_ms);

    let job_id = query
        .job_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());

    let outcomes = match job_id {
        Some(job_id) => vec![state.worker.process_job(job_id, options).await?],
        None => {
            let jobs = query
                .jobs
                .unwrap_or(state.jobs_per_run)
                .clamp(1, MAX_JOBS_PER_RUN);
            state.worker.process_due(options, jobs).await?
        }
    };

    Ok(Json(WorkerResponse {
        processed: outcomes.len(),
        jobs: outcomes,
    }))
}
