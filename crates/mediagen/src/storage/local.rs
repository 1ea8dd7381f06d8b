use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{validate_object_path, SignedUrl, StorageGateway, UrlSigner};
use crate::error::StorageError;

/// Filesystem-backed object store. Objects live under `root` at their
/// relative path; URLs are signed for the server's `/files` route.
pub struct LocalObjectStore {
    root: PathBuf,
    signer: UrlSigner,
}

impl LocalObjectStore {
    pub fn new<P: AsRef<Path>>(root: P, signer: UrlSigner) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            signer,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    /// Resolves an object path to its location on disk.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        validate_object_path(path)?;
        Ok(self.root.join(path))
    }

    async fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })
    }
}

#[async_trait]
impl StorageGateway for LocalObjectStore {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            self.ensure_directory(parent).await?;
        }

        // Write beside the target, then rename so readers never see a
        // partial object.
        let file_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("object");
        let tmp = target.with_file_name(format!(
            ".{}.{}.tmp",
            file_name,
            uuid::Uuid::new_v4().simple()
        ));

        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| StorageError::WriteObject {
                path: tmp.clone(),
                source: e,
            })?;
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::WriteObject {
                path: target,
                source: e,
            });
        }

        log::debug!(
            "Stored object {} ({} bytes, {})",
            path,
            bytes.len(),
            content_type
        );
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let target = self.resolve(path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(StorageError::ReadObject {
                path: target,
                source: e,
            }),
        }
    }

    async fn delete(&self, paths: &[String]) -> Result<(), StorageError> {
        for path in paths {
            let target = self.resolve(path)?;
            match tokio::fs::remove_file(&target).await {
                Ok(()) => log::debug!("Deleted object {}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(StorageError::DeleteObject {
                        path: target,
                        source: e,
                    })
                }
            }
        }
        Ok(())
    }

    async fn signed_urls(
        &self,
        paths: &[String],
        ttl: Duration,
    ) -> Result<Vec<SignedUrl>, StorageError> {
        let now = Utc::now();
        paths
            .iter()
            .map(|path| {
                validate_object_path(path)?;
                self.signer.sign(path, ttl, now)
            })
            .collect()
    }
}
