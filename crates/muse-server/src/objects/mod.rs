//! Object store gateway
//!
//! Binary payloads (audio, cover art) live outside the table. Everything
//! else refers to them by key only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use muse_common::{error::Classify, ErrorKind};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use thiserror::Error;

pub mod memory;
pub mod s3;

pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

pub type SharedObjects = Arc<dyn ObjectStore>;

pub type ObjectResult<T> = Result<T, ObjectStoreError>;

#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Object store unavailable: {0}")]
    Unavailable(String),

    #[error("Object store error: {0}")]
    Backend(String),
}

impl Classify for ObjectStoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            ObjectStoreError::NotFound(_) => ErrorKind::NotFound,
            ObjectStoreError::InvalidKey(_) => ErrorKind::Validation,
            ObjectStoreError::Unavailable(_) => ErrorKind::Transient,
            ObjectStoreError::Backend(_) => ErrorKind::Internal,
        }
    }
}

impl From<muse_common::MuseError> for ObjectStoreError {
    fn from(err: muse_common::MuseError) -> Self {
        ObjectStoreError::InvalidKey(err.to_string())
    }
}

/// A time-limited URL for a direct client transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectMetadata {
    pub key: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// URL the client PUTs the payload to.
    async fn presign_upload(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> ObjectResult<PresignedUrl>;

    async fn presign_download(&self, key: &str, ttl: Duration) -> ObjectResult<PresignedUrl>;

    /// `None` when nothing is stored under `key`.
    async fn head_object(&self, key: &str) -> ObjectResult<Option<ObjectMetadata>>;

    async fn get_object(&self, key: &str) -> ObjectResult<Vec<u8>>;

    async fn put_object(&self, key: &str, data: Vec<u8>, content_type: &str) -> ObjectResult<()>;

    /// Server-side copy within the bucket. Overwrites `dest`.
    async fn copy_object(&self, source: &str, dest: &str) -> ObjectResult<()>;

    /// Deleting a missing key succeeds.
    async fn delete_object(&self, key: &str) -> ObjectResult<()>;
}

/// Expiry instant for a URL issued now.
pub(crate) fn expires_at(ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
    Utc::now() + ttl
}
