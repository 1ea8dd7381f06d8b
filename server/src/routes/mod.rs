use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod files;
pub mod jobs;
pub mod worker;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/worker", get(worker::trigger))
        .route("/api/jobs/{id}/retry", post(jobs::retry))
        .route("/api/jobs/{id}/units", get(jobs::units))
        .route("/files/{*path}", get(files::serve))
        .route("/healthz", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
