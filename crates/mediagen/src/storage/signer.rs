//! HMAC-SHA256 signed URLs for stored objects.
//!
//! Format: `{base}/files/{path}?exp={unix_seconds}&sig={hex}` where the
//! signature covers `"{path}:{exp}"`.

use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;
use url::Url;

use crate::error::StorageError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signed URL has expired")]
    Expired,

    #[error("signature does not match")]
    Invalid,

    #[error("malformed signature parameters: {0}")]
    Malformed(String),
}

/// A signed, time-limited URL for one object path.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SignedUrl {
    pub path: String,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct UrlSigner {
    secret: SecretString,
    base_url: Url,
}

impl UrlSigner {
    pub fn new(secret: SecretString, base_url: &str) -> Result<Self, StorageError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| StorageError::Signing(format!("invalid base URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(StorageError::Signing(format!(
                "base URL '{}' cannot carry a path",
                base_url
            )));
        }
        Ok(Self { secret, base_url })
    }

    /// Signs `path` so that it stays valid until `now + ttl`.
    pub fn sign(
        &self,
        path: &str,
        ttl: std::time::Duration,
        now: DateTime<Utc>,
    ) -> Result<SignedUrl, StorageError> {
        let exp = now.timestamp() + i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2);
        let sig = self.compute_signature(path, exp)?;

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::Signing("base URL cannot carry a path".into()))?
            .pop_if_empty()
            .push("files")
            .extend(path.split('/'));
        url.query_pairs_mut()
            .append_pair("exp", &exp.to_string())
            .append_pair("sig", &sig);

        let expires_at = Utc
            .timestamp_opt(exp, 0)
            .single()
            .ok_or_else(|| StorageError::Signing(format!("expiry {} out of range", exp)))?;

        Ok(SignedUrl {
            path: path.to_string(),
            url: url.to_string(),
            expires_at,
        })
    }

    /// Checks expiry first, then the signature in constant time.
    pub fn verify(
        &self,
        path: &str,
        exp: i64,
        sig: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SignatureError> {
        if now.timestamp() > exp {
            return Err(SignatureError::Expired);
        }
        let provided = hex::decode(sig).map_err(|e| SignatureError::Malformed(e.to_string()))?;

        let mut mac = self
            .mac()
            .map_err(|e| SignatureError::Malformed(e.to_string()))?;
        mac.update(payload(path, exp).as_bytes());
        mac.verify_slice(&provided)
            .map_err(|_| SignatureError::Invalid)
    }

    fn compute_signature(&self, path: &str, exp: i64) -> Result<String, StorageError> {
        let mut mac = self.mac()?;
        mac.update(payload(path, exp).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn mac(&self) -> Result<HmacSha256, StorageError> {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|e| StorageError::Signing(format!("HMAC error: {}", e)))
    }
}

fn payload(path: &str, exp: i64) -> String {
    format!("{}:{}", path, exp)
}
