//! Error types shared across Muse crates

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, MuseError>;

/// How a failure should be handled by whoever receives it.
///
/// Every layer maps its own error enum onto one of these kinds, which is
/// what retry loops and the HTTP boundary switch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network hiccup or throttling; retry with backoff
    Transient,
    /// Optimistic write collision; re-read and retry
    Conflict,
    /// Referenced entity is missing
    NotFound,
    /// Malformed input; never retried
    Validation,
    /// Caller is not allowed to touch the entity
    Forbidden,
    /// Optional external collaborator is down
    UpstreamUnavailable,
    /// Anything else
    Internal,
}

impl ErrorKind {
    /// Whether a bounded retry loop should try again
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::Conflict)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by every layer-specific error enum.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

/// Errors raised by the helpers in this crate
#[derive(Error, Debug)]
pub enum MuseError {
    #[error("Invalid identifier for {field}: {reason}")]
    InvalidId { field: &'static str, reason: String },

    #[error("Invalid object key: {0}")]
    InvalidObjectKey(String),

    #[error("Invalid key component for {field}: {reason}")]
    InvalidKeyPart { field: &'static str, reason: String },

    #[error("Malformed cursor")]
    MalformedCursor,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Classify for MuseError {
    fn kind(&self) -> ErrorKind {
        match self {
            MuseError::Serialization(_) => ErrorKind::Internal,
            _ => ErrorKind::Validation,
        }
    }
}
