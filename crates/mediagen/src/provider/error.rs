use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Classification of a failed provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    ServerError,
    AccessDenied,
    NotFound,
    ContentBlocked,
    Malformed,
    Unknown,
}

impl ErrorKind {
    /// Only throttling and server-side faults are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::ServerError)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServerError => "server_error",
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ContentBlocked => "content_blocked",
            ErrorKind::Malformed => "malformed",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Maps an HTTP status (and error body) to a kind.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            429 => ErrorKind::RateLimited,
            401 | 403 => ErrorKind::AccessDenied,
            404 => ErrorKind::NotFound,
            400 if mentions_safety(body) => ErrorKind::ContentBlocked,
            500..=599 => ErrorKind::ServerError,
            _ => ErrorKind::Unknown,
        }
    }

    /// Maps a google.rpc status name from a long-running operation.
    pub fn from_rpc_status(status: &str, message: &str) -> Self {
        match status {
            "RESOURCE_EXHAUSTED" => ErrorKind::RateLimited,
            "UNAVAILABLE" | "INTERNAL" | "DEADLINE_EXCEEDED" => ErrorKind::ServerError,
            "PERMISSION_DENIED" | "UNAUTHENTICATED" => ErrorKind::AccessDenied,
            "NOT_FOUND" => ErrorKind::NotFound,
            "INVALID_ARGUMENT" | "FAILED_PRECONDITION" if mentions_safety(message) => {
                ErrorKind::ContentBlocked
            }
            _ => ErrorKind::Unknown,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn mentions_safety(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    ["safety", "blocked", "responsible ai", "prohibited", "policy"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// A classified provider failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
    pub status: Option<u16>,
}

impl ProviderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Malformed, message)
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ContentBlocked, message)
    }

    /// Builds an error from a non-success HTTP response.
    pub fn from_response(status: u16, body: &str) -> Self {
        let snippet: String = body.chars().take(300).collect();
        Self::new(
            ErrorKind::from_status(status, body),
            format!("HTTP {}: {}", status, snippet.trim()),
        )
        .with_status(status)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() || err.is_connect() {
            ErrorKind::ServerError
        } else if err.is_decode() {
            ErrorKind::Malformed
        } else if let Some(status) = err.status() {
            ErrorKind::from_status(status.as_u16(), "")
        } else {
            ErrorKind::Unknown
        };
        let status = err.status().map(|s| s.as_u16());
        Self {
            kind,
            message: err.to_string(),
            status,
        }
    }
}
