use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SignatureQuery {
    pub exp: Option<i64>,
    pub sig: Option<String>,
}

/// `GET /files/{*path}`: serves a stored object behind a signed URL.
pub async fn serve(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<SignatureQuery>,
) -> AppResult<impl IntoResponse> {
    let (Some(exp), Some(sig)) = (query.exp, query.sig.as_deref()) else {
        return Err(AppError::forbidden("Missing signature"));
    };
    state.signer.verify(&path, exp, sig, Utc::now())?;

    let bytes = state.worker.storage().download(&path).await?;
    let content_type = mime_guess::from_path(&path)
        .first_raw()
        .unwrap_or("application/octet-stream");

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CACHE_CONTROL, "private, max-age=3600".to_string()),
        ],
        bytes,
    ))
}
