//! Object storage gateway used by the worker and the HTTP layer.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageError;

pub mod local;
pub mod signer;

pub use local::LocalObjectStore;
pub use signer::{SignatureError, SignedUrl, UrlSigner};

/// Default lifetime of signed URLs handed to clients.
pub const DEFAULT_SIGNED_URL_TTL: Duration = Duration::from_secs(6 * 60 * 60);

#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Durably stores `bytes` at `path`, replacing any existing object.
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str)
        -> Result<(), StorageError>;

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Deletes the given objects. Missing objects are not an error.
    async fn delete(&self, paths: &[String]) -> Result<(), StorageError>;

    /// Issues one signed URL per path, in the same order.
    async fn signed_urls(&self, paths: &[String], ttl: Duration)
        -> Result<Vec<SignedUrl>, StorageError>;
}

/// Rejects empty, absolute and parent-relative object paths.
pub fn validate_object_path(path: &str) -> Result<(), StorageError> {
    let invalid = |reason: &str| StorageError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if path.is_empty() {
        return Err(invalid("empty path"));
    }
    if path.starts_with('/') || path.contains('\\') || path.contains(':') {
        return Err(invalid("must be a relative forward-slash path"));
    }
    if path
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(invalid("empty, '.' or '..' segment"));
    }
    Ok(())
}
