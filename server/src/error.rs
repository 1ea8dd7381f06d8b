use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use mediagen::db::DatabaseError;
use mediagen::storage::SignatureError;
use mediagen::{ConfigError, MediagenError, SecretError, StorageError, WorkerError};

pub type AppResult<T> = Result<T, AppError>;

/// Error returned by HTTP handlers, rendered as a JSON body.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<WorkerError> for AppError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::JobNotFound(id) => Self::not_found(format!("Job not found: {}", id)),
            WorkerError::InvalidRequest(msg) => Self::bad_request(msg),
            WorkerError::ClaimLost(_) => Self::conflict(err.to_string()),
            WorkerError::QueueFull | WorkerError::ChannelClosed => {
                Self::unavailable(err.to_string())
            }
            WorkerError::Repository(e) => e.into(),
            WorkerError::Storage(e) => e.into(),
            WorkerError::Reference { .. } => Self::internal(err.to_string()),
        }
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        tracing::error!(error = %err, "database operation failed");
        Self::internal("Database operation failed")
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => Self::not_found("Object not found"),
            StorageError::InvalidPath { .. } => Self::bad_request(err.to_string()),
            _ => {
                tracing::error!(error = %err, "storage operation failed");
                Self::internal("Storage operation failed")
            }
        }
    }
}

impl From<SignatureError> for AppError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::Malformed(_) => Self::bad_request(err.to_string()),
            SignatureError::Expired | SignatureError::Invalid => Self::forbidden(err.to_string()),
        }
    }
}

/// Startup failures of the server binary.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging setup failed: {0}")]
    Logging(#[from] crate::logging::LoggingError),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    #[error("{0}")]
    Mediagen(#[from] MediagenError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

impl From<DatabaseError> for ServerError {
    fn from(err: DatabaseError) -> Self {
        ServerError::Mediagen(err.into())
    }
}

impl From<StorageError> for ServerError {
    fn from(err: StorageError) -> Self {
        ServerError::Mediagen(err.into())
    }
}

impl From<mediagen::ProviderError> for ServerError {
    fn from(err: mediagen::ProviderError) -> Self {
        ServerError::Mediagen(err.into())
    }
}
