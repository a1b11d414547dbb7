use chrono::{DateTime, Utc};
use muse_common::{error::Classify, ErrorKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::{
    models::Principal,
    objects::{ObjectStore, ObjectStoreError},
    repository::{RepoError, Repository},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTrackQuery {
    pub owner_id: Uuid,
    pub track_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTrackResponse {
    pub url: String,
    pub expires_at: DateTime<Utc>,
    pub file_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadTrackError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Objects(#[from] ObjectStoreError),
}

impl Classify for DownloadTrackError {
    fn kind(&self) -> ErrorKind {
        match self {
            DownloadTrackError::Repo(e) => e.kind(),
            DownloadTrackError::Objects(e) => e.kind(),
        }
    }
}

/// Short-lived read URL for a track the caller may see.
#[tracing::instrument(skip(repo, objects))]
pub async fn handle(
    repo: &Repository,
    objects: &dyn ObjectStore,
    ttl: Duration,
    principal: &Principal,
    query: DownloadTrackQuery,
) -> Result<DownloadTrackResponse, DownloadTrackError> {
    let track = repo
        .get_track(principal, &query.owner_id, &query.track_id)
        .await?;
    let presigned = objects.presign_download(&track.object_key, ttl).await?;
    tracing::debug!(expires_at = %presigned.expires_at, "Download URL generated");

    Ok(DownloadTrackResponse {
        url: presigned.url,
        expires_at: presigned.expires_at,
        file_name: track.value.file_name,
    })
}
