//! Shared-secret check for the trigger routes.
//!
//! A request passes with `Authorization: Bearer <secret>`, an
//! `x-worker-secret` header, or the configured scheduler identity header.
//! With nothing configured every request is rejected.

use axum::http::{header, HeaderMap, HeaderName};
use secrecy::{ExposeSecret, SecretString};

use mediagen::config::ServerConfig;
use mediagen::resolve_secret_optional;

use crate::error::{AppError, ServerError};

pub const WORKER_SECRET_HEADER: &str = "x-worker-secret";

pub struct AuthConfig {
    secret: Option<SecretString>,
    scheduler_header: Option<HeaderName>,
    scheduler_value: Option<String>,
}

impl AuthConfig {
    pub fn new(
        secret: Option<SecretString>,
        scheduler_header: Option<HeaderName>,
        scheduler_value: Option<String>,
    ) -> Self {
        Self {
            secret,
            scheduler_header,
            scheduler_value,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self, ServerError> {
        let secret = resolve_secret_optional(
            config.worker_secret.as_deref(),
            config.worker_secret_file.as_deref(),
            config.worker_secret_env_var.as_deref(),
        )?;
        let scheduler_header = match config.scheduler_header.as_deref() {
            Some(name) => Some(HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                mediagen::ConfigError::Validation {
                    message: format!("invalid server.scheduler_header '{}': {}", name, e),
                }
            })?),
            None => None,
        };
        Ok(Self::new(
            secret,
            scheduler_header,
            config.scheduler_header_value.clone(),
        ))
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some() || self.scheduler_header.is_some()
    }

    pub fn authorize(&self, headers: &HeaderMap) -> Result<(), AppError> {
        if let Some(secret) = &self.secret {
            let expected = secret.expose_secret().as_bytes();
            // Each credential is checked on its own; a stale one must not
            // mask a valid one.
            let matched = [bearer_token(headers), header_str(headers, WORKER_SECRET_HEADER)]
                .into_iter()
                .flatten()
                .any(|presented| constant_time_eq::constant_time_eq(presented.as_bytes(), expected));
            if matched {
                return Ok(());
            }
        }

        if let Some(name) = &self.scheduler_header {
            if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
                let accepted = match &self.scheduler_value {
                    Some(expected) => {
                        constant_time_eq::constant_time_eq(value.as_bytes(), expected.as_bytes())
                    }
                    None => true,
                };
                if accepted {
                    return Ok(());
                }
            }
        }

        Err(AppError::unauthorized("Unauthorized"))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, header::AUTHORIZATION.as_str())?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};

    fn with_secret() -> AuthConfig {
        AuthConfig::new(Some(SecretString::from("s3cret".to_string())), None, None)
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn test_bearer_token_accepted() {
        let auth = with_secret();
        assert!(auth.authorize(&headers(&[("authorization", "Bearer s3cret")])).is_ok());
    }

    #[test]
    fn test_worker_secret_header_accepted() {
        let auth = with_secret();
        assert!(auth.authorize(&headers(&[("x-worker-secret", "s3cret")])).is_ok());
    }

    #[test]
    fn test_stale_bearer_does_not_mask_worker_secret() {
        let auth = with_secret();
        let presented = headers(&[
            ("authorization", "Bearer rotated-away"),
            ("x-worker-secret", "s3cret"),
        ]);
        assert!(auth.authorize(&presented).is_ok());

        let presented = headers(&[
            ("authorization", "Bearer s3cret"),
            ("x-worker-secret", "rotated-away"),
        ]);
        assert!(auth.authorize(&presented).is_ok());

        let presented = headers(&[
            ("authorization", "Bearer rotated-away"),
            ("x-worker-secret", "also-wrong"),
        ]);
        assert!(auth.authorize(&presented).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let auth = with_secret();
        let err = auth
            .authorize(&headers(&[("authorization", "Bearer nope")]))
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert!(auth.authorize(&HeaderMap::new()).is_err());
    }

    #[test]
    fn test_scheduler_header() {
        let auth = AuthConfig::new(
            None,
            Some(HeaderName::from_static("x-cloudscheduler")),
            Some("true".into()),
        );
        assert!(auth.authorize(&headers(&[("x-cloudscheduler", "true")])).is_ok());
        assert!(auth.authorize(&headers(&[("x-cloudscheduler", "false")])).is_err());
    }

    #[test]
    fn test_unconfigured_fails_closed() {
        let auth = AuthConfig::new(None, None, None);
        assert!(!auth.is_configured());
        assert!(auth.authorize(&headers(&[("authorization", "Bearer ")])).is_err());
    }
}
