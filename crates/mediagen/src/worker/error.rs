use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid generation request: {0}")]
    InvalidRequest(String),

    #[error("Failed to load reference image '{path}': {reason}")]
    Reference { path: String, reason: String },

    #[error("Repository error: {0}")]
    Repository(#[from] crate::db::DatabaseError),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::error::StorageError),

    #[error("Claim on job {0} was lost")]
    ClaimLost(String),

    #[error("Dispatch queue is full")]
    QueueFull,

    #[error("Dispatcher has shut down")]
    ChannelClosed,
}

impl WorkerError {
    /// Errors raised while building the request template. These fail the
    /// job instead of aborting the invocation.
    pub fn is_fatal_to_job(&self) -> bool {
        matches!(
            self,
            WorkerError::InvalidRequest(_) | WorkerError::Reference { .. }
        )
    }
}
