//! HTTP-facing error type
//!
//! Every layer error is folded into [`AppError`] through its
//! [`ErrorKind`]; the kind alone decides the status code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use muse_common::{error::Classify, ErrorKind, MuseError};
use std::fmt::Display;
use thiserror::Error;

use crate::{
    api::response::ErrorResponse,
    ingest::{EnqueueError, StageError},
    objects::ObjectStoreError,
    repository::RepoError,
    table::StoreError,
};

/// Result type alias for handlers
pub type ApiResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("{message}")]
    Classified { kind: ErrorKind, message: String },
}

impl AppError {
    pub fn classified<E: Classify + Display>(err: E) -> Self {
        AppError::Classified {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Classified {
            kind: ErrorKind::Validation,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            AppError::Unauthorized(_) => None,
            AppError::Classified { kind, .. } => Some(*kind),
        }
    }
}

/// Status code and machine-readable code for a kind
pub fn status_for(kind: ErrorKind) -> (StatusCode, &'static str) {
    match kind {
        ErrorKind::Validation => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        ErrorKind::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN"),
        ErrorKind::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        ErrorKind::Conflict => (StatusCode::CONFLICT, "CONFLICT"),
        ErrorKind::Transient => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
        ErrorKind::UpstreamUnavailable | ErrorKind::Internal => {
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message),
            AppError::Classified { kind, message } => {
                let (status, code) = status_for(kind);
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!(kind = %kind, "Internal error: {}", message);
                    (status, code, "An internal error occurred".to_string())
                } else {
                    (status, code, message)
                }
            }
        };

        (status, Json(ErrorResponse::new(code, message))).into_response()
    }
}

macro_rules! classified_from {
    ($($source:ty),+ $(,)?) => {
        $(
            impl From<$source> for AppError {
                fn from(err: $source) -> Self {
                    AppError::classified(err)
                }
            }
        )+
    };
}

classified_from!(
    RepoError,
    StoreError,
    ObjectStoreError,
    StageError,
    EnqueueError,
    MuseError,
);
