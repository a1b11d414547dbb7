use muse_common::{error::Classify, ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    ingest::{EnqueueError, OrchestratorHandle, UploadRef},
    models::{PipelineState, Principal, ProcessingStep, UploadStatus},
    repository::{RepoError, Repository},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReprocessUploadCommand {
    pub upload_id: Uuid,
    /// First step to run again; earlier outputs are carried over.
    pub from_step: ProcessingStep,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReprocessUploadResponse {
    pub upload_id: Uuid,
    pub retry_of: Uuid,
    pub status: UploadStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum ReprocessUploadError {
    #[error("Only failed uploads can be reprocessed (upload is {0})")]
    NotFailed(UploadStatus),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Enqueue(#[from] EnqueueError),
}

impl Classify for ReprocessUploadError {
    fn kind(&self) -> ErrorKind {
        match self {
            ReprocessUploadError::NotFailed(_) => ErrorKind::Conflict,
            ReprocessUploadError::Repo(e) => e.kind(),
            ReprocessUploadError::Enqueue(e) => e.kind(),
        }
    }
}

/// Start a new attempt for a failed upload.
///
/// The failed upload is left as it is; the new attempt points back at it
/// through `retry_of`.
#[tracing::instrument(skip(repo, pipeline), fields(owner_id = %principal.owner_id, upload_id = %command.upload_id))]
pub async fn handle(
    repo: &Repository,
    pipeline: &OrchestratorHandle,
    principal: &Principal,
    command: ReprocessUploadCommand,
) -> Result<ReprocessUploadResponse, ReprocessUploadError> {
    let failed = repo
        .get_upload(principal, &principal.owner_id, &command.upload_id)
        .await?;
    if failed.state != PipelineState::Failed {
        return Err(ReprocessUploadError::NotFailed(failed.status()));
    }

    let attempt = failed.retry_attempt(command.from_step);
    let attempt = repo.create_upload(principal, attempt).await?;
    pipeline
        .enqueue(UploadRef::new(attempt.owner_id, attempt.id))
        .await?;
    tracing::info!(attempt = %attempt.id, from_step = command.from_step.as_str(), "Upload reprocessing queued");

    Ok(ReprocessUploadResponse {
        upload_id: attempt.id,
        retry_of: failed.id,
        status: attempt.status(),
    })
}
