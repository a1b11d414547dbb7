use muse_common::{error::Classify, ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    ingest::{EnqueueError, OrchestratorHandle, UploadRef},
    models::{PipelineState, Principal, UploadStatus, Versioned},
    objects::{ObjectStore, ObjectStoreError},
    repository::{RepoError, Repository},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmUploadCommand {
    pub upload_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmUploadResponse {
    pub upload_id: Uuid,
    pub status: UploadStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfirmUploadError {
    #[error("Upload already confirmed")]
    AlreadyConfirmed,
    #[error("file not found in upload location")]
    ObjectMissing,
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Objects(#[from] ObjectStoreError),
    #[error(transparent)]
    Enqueue(#[from] EnqueueError),
}

impl Classify for ConfirmUploadError {
    fn kind(&self) -> ErrorKind {
        match self {
            ConfirmUploadError::AlreadyConfirmed => ErrorKind::Conflict,
            ConfirmUploadError::ObjectMissing => ErrorKind::Validation,
            ConfirmUploadError::Repo(e) => e.kind(),
            ConfirmUploadError::Objects(e) => e.kind(),
            ConfirmUploadError::Enqueue(e) => e.kind(),
        }
    }
}

/// Verify the client's bytes landed and start processing.
///
/// Only a pending upload can be confirmed, so each upload is queued once.
#[tracing::instrument(skip(repo, objects, pipeline), fields(owner_id = %principal.owner_id, upload_id = %command.upload_id))]
pub async fn handle(
    repo: &Repository,
    objects: &dyn ObjectStore,
    pipeline: &OrchestratorHandle,
    principal: &Principal,
    command: ConfirmUploadCommand,
) -> Result<ConfirmUploadResponse, ConfirmUploadError> {
    let Versioned {
        value: mut upload,
        version,
    } = repo
        .get_upload(principal, &principal.owner_id, &command.upload_id)
        .await?;

    if upload.state != PipelineState::Pending {
        return Err(ConfirmUploadError::AlreadyConfirmed);
    }
    if objects.head_object(&upload.object_key).await?.is_none() {
        return Err(ConfirmUploadError::ObjectMissing);
    }

    upload.state = PipelineState::Confirmed;
    let upload = match repo.save_upload(version, upload).await {
        Ok(saved) => saved,
        // A concurrent confirm won the race.
        Err(e) if e.is_condition_failed() => return Err(ConfirmUploadError::AlreadyConfirmed),
        Err(e) => return Err(e.into()),
    };

    pipeline
        .enqueue(UploadRef::new(upload.owner_id, upload.id))
        .await?;
    tracing::info!("Upload confirmed and queued");

    Ok(ConfirmUploadResponse {
        upload_id: upload.id,
        status: upload.status(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{
        models::{Role, Upload},
        objects::MemoryObjectStore,
        repository::test_support::repo,
    };

    async fn pending(repo: &Repository, principal: &Principal) -> Upload {
        repo.create_upload(
            principal,
            Upload::new(principal.owner_id, "song.mp3", 3, "audio/mpeg"),
        )
        .await
        .unwrap()
        .value
    }

    #[tokio::test]
    async fn test_confirm_queues_once() {
        let repo = repo();
        let objects = MemoryObjectStore::default();
        let (pipeline, mut queued) = OrchestratorHandle::detached(4);
        let principal = Principal::new(Uuid::new_v4(), Role::Subscriber);
        let upload = pending(&repo, &principal).await;
        objects
            .insert(&upload.object_key, vec![1, 2, 3], "audio/mpeg")
            .await;

        let command = ConfirmUploadCommand {
            upload_id: upload.id,
        };
        let response = handle(&repo, &objects, &pipeline, &principal, command.clone())
            .await
            .unwrap();
        assert_eq!(response.status, UploadStatus::Processing);
        assert_eq!(
            queued.recv().await.unwrap(),
            UploadRef::new(upload.owner_id, upload.id)
        );

        let err = handle(&repo, &objects, &pipeline, &principal, command)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfirmUploadError::AlreadyConfirmed));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(queued.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_confirm_without_object() {
        let repo = repo();
        let (pipeline, _queued) = OrchestratorHandle::detached(4);
        let principal = Principal::new(Uuid::new_v4(), Role::Subscriber);
        let upload = pending(&repo, &principal).await;

        let err = handle(
            &repo,
            &MemoryObjectStore::default(),
            &pipeline,
            &principal,
            ConfirmUploadCommand {
                upload_id: upload.id,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "file not found in upload location");
        assert_eq!(err.kind(), ErrorKind::Validation);

        let stored = repo.load_upload(&upload.owner_id, &upload.id).await.unwrap();
        assert_eq!(stored.state, PipelineState::Pending);
    }

    #[tokio::test]
    async fn test_confirm_someone_elses_upload() {
        let repo = repo();
        let (pipeline, _queued) = OrchestratorHandle::detached(4);
        let owner = Principal::new(Uuid::new_v4(), Role::Subscriber);
        let upload = pending(&repo, &owner).await;
        let stranger = Principal::new(Uuid::new_v4(), Role::Subscriber);

        let err = handle(
            &repo,
            &MemoryObjectStore::default(),
            &pipeline,
            &stranger,
            ConfirmUploadCommand {
                upload_id: upload.id,
            },
        )
        .await
        .unwrap_err();
        // Scoped to the caller's own partition, so the upload is invisible.
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
