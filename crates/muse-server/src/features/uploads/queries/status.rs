use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    models::{IndexOutcome, PipelineState, Principal, ProcessingStep, Upload, UploadStatus},
    repository::{RepoResult, Repository},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetUploadQuery {
    pub upload_id: Uuid,
}

/// Client view of an upload's progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadStatusResponse {
    pub upload_id: Uuid,
    pub status: UploadStatus,
    pub state: PipelineState,
    pub completed_steps: Vec<ProcessingStep>,
    pub track_id: Option<Uuid>,
    pub error_reason: Option<String>,
    pub index_outcome: Option<IndexOutcome>,
    pub file_name: String,
    pub file_size: u64,
    pub retry_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Upload> for UploadStatusResponse {
    fn from(upload: Upload) -> Self {
        Self {
            upload_id: upload.id,
            status: upload.status(),
            state: upload.state,
            completed_steps: upload.steps.completed(),
            track_id: upload.track_id,
            error_reason: upload.error_reason,
            index_outcome: upload.index_outcome,
            file_name: upload.file_name,
            file_size: upload.file_size,
            retry_of: upload.retry_of,
            created_at: upload.created_at,
            updated_at: upload.updated_at,
            completed_at: upload.completed_at,
        }
    }
}

#[tracing::instrument(skip(repo))]
pub async fn handle(
    repo: &Repository,
    principal: &Principal,
    query: GetUploadQuery,
) -> RepoResult<UploadStatusResponse> {
    let upload = repo
        .get_upload(principal, &principal.owner_id, &query.upload_id)
        .await?;
    Ok(upload.value.into())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{models::Role, repository::test_support::repo};

    #[tokio::test]
    async fn test_status_of_failed_upload() {
        let repo = repo();
        let principal = Principal::new(Uuid::new_v4(), Role::Subscriber);
        let mut upload = Upload::new(principal.owner_id, "song.mp3", 3, "audio/mpeg");
        upload.state = PipelineState::Failed;
        upload.steps.mark(ProcessingStep::MetadataExtracted);
        upload.error_reason = Some("cover_art: internal error".to_string());
        let upload = repo.create_upload(&principal, upload).await.unwrap();

        let status = handle(
            &repo,
            &principal,
            GetUploadQuery {
                upload_id: upload.id,
            },
        )
        .await
        .unwrap();
        assert_eq!(status.status, UploadStatus::Failed);
        assert_eq!(status.completed_steps, vec![ProcessingStep::MetadataExtracted]);
        assert_eq!(status.error_reason.as_deref(), Some("cover_art: internal error"));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["completed_steps"][0], "metadata_extracted");
    }
}
