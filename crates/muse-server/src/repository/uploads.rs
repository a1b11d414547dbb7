use chrono::Utc;
use muse_common::{ids::validate_object_key, Cursor};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{authorize, RepoError, RepoResult, Repository};
use crate::{
    models::{keys, Principal, Upload, UploadStatus, Versioned},
    table::{Condition, IndexName, Page, QueryRequest, SortRange, StoreError},
};

impl Repository {
    #[instrument(skip(self, upload), fields(upload_id = %upload.id))]
    pub async fn create_upload(
        &self,
        principal: &Principal,
        upload: Upload,
    ) -> RepoResult<Versioned<Upload>> {
        authorize(principal, &upload.owner_id)?;
        validate_object_key(&upload.object_key)?;
        let created = self.save(upload, Condition::NotExists).await?;
        info!(state = %created.state, "Upload recorded");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn get_upload(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        upload_id: &Uuid,
    ) -> RepoResult<Versioned<Upload>> {
        authorize(principal, owner_id)?;
        self.load_upload(owner_id, upload_id).await
    }

    /// Unchecked read used by the pipeline, which acts for the owner.
    pub async fn load_upload(
        &self,
        owner_id: &Uuid,
        upload_id: &Uuid,
    ) -> RepoResult<Versioned<Upload>> {
        self.load(&keys::upload(owner_id, upload_id)).await
    }

    #[instrument(skip(self, cursor))]
    pub async fn list_uploads(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> RepoResult<Page<Upload>> {
        authorize(principal, owner_id)?;
        self.query_records(
            QueryRequest::new(IndexName::Primary, keys::owner_partition(owner_id))
                .sort(SortRange::BeginsWith(keys::UPLOAD_PREFIX.to_string()))
                .cursor(cursor)
                .limit(limit),
        )
        .await
    }

    /// Uploads across all owners in one client-visible status, oldest first.
    #[instrument(skip(self, cursor))]
    pub async fn list_uploads_by_status(
        &self,
        status: UploadStatus,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> RepoResult<Page<Upload>> {
        self.query_records(
            QueryRequest::new(IndexName::Gsi1, keys::upload_status_partition(status.as_str()))
                .cursor(cursor)
                .limit(limit),
        )
        .await
    }

    /// Persist a new state of `upload` if it is still at `expected_version`.
    ///
    /// A backwards state transition is rejected before anything is written.
    /// The status index moves with the status because the whole item is
    /// rewritten.
    #[instrument(skip(self, upload), fields(upload_id = %upload.id, state = %upload.state))]
    pub async fn save_upload(
        &self,
        expected_version: u64,
        mut upload: Upload,
    ) -> RepoResult<Versioned<Upload>> {
        let key = keys::upload(&upload.owner_id, &upload.id);
        let current = self.load::<Upload>(&key).await?;

        if !current.state.can_transition_to(upload.state) {
            warn!(from = %current.state, to = %upload.state, "Rejected upload state change");
            return Err(RepoError::validation(format!(
                "status regression: {} -> {}",
                current.state, upload.state
            )));
        }
        if current.version != expected_version {
            return Err(StoreError::ConditionFailed {
                key,
                reason: format!(
                    "expected version {}, found {}",
                    expected_version, current.version
                ),
            }
            .into());
        }

        upload.updated_at = Utc::now();
        self.save(upload, Condition::VersionEquals(expected_version))
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::super::test_support::{owner_principal, repo};
    use super::*;
    use crate::models::PipelineState;
    use muse_common::{error::Classify, ErrorKind};

    fn upload_for(principal: &Principal) -> Upload {
        Upload::new(principal.owner_id, "song.mp3", 2048, "audio/mpeg")
    }

    #[tokio::test]
    async fn test_create_and_read_back() {
        let repo = repo();
        let owner = owner_principal();
        let created = repo.create_upload(&owner, upload_for(&owner)).await.unwrap();
        assert_eq!(created.status(), UploadStatus::Pending);

        let read = repo
            .get_upload(&owner, &owner.owner_id, &created.id)
            .await
            .unwrap();
        assert_eq!(read.value, created.value);

        let err = repo
            .get_upload(&owner_principal(), &owner.owner_id, &created.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn test_status_never_regresses() {
        let repo = repo();
        let owner = owner_principal();
        let created = repo.create_upload(&owner, upload_for(&owner)).await.unwrap();

        let mut confirmed = created.value.clone();
        confirmed.state = PipelineState::Confirmed;
        let confirmed = repo.save_upload(created.version, confirmed).await.unwrap();

        let mut completed = confirmed.value.clone();
        completed.state = PipelineState::Completed;
        let completed = repo.save_upload(confirmed.version, completed).await.unwrap();

        for state in [PipelineState::Pending, PipelineState::Indexed, PipelineState::Failed] {
            let mut back = completed.value.clone();
            back.state = state;
            let err = repo.save_upload(completed.version, back).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{}", state);
            assert!(err.to_string().contains("status regression"));
        }

        let stored = repo.load_upload(&owner.owner_id, &created.id).await.unwrap();
        assert_eq!(stored.state, PipelineState::Completed);
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let repo = repo();
        let owner = owner_principal();
        let created = repo.create_upload(&owner, upload_for(&owner)).await.unwrap();

        let mut next = created.value.clone();
        next.state = PipelineState::Confirmed;
        repo.save_upload(created.version, next.clone()).await.unwrap();

        let err = repo.save_upload(created.version, next).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_status_index_follows_status() {
        let repo = repo();
        let owner = owner_principal();
        let created = repo.create_upload(&owner, upload_for(&owner)).await.unwrap();
        let pending = repo
            .list_uploads_by_status(UploadStatus::Pending, None, 10)
            .await
            .unwrap();
        assert_eq!(pending.items.len(), 1);

        let mut next = created.value.clone();
        next.state = PipelineState::MetadataDone;
        repo.save_upload(created.version, next).await.unwrap();

        let pending = repo
            .list_uploads_by_status(UploadStatus::Pending, None, 10)
            .await
            .unwrap();
        let processing = repo
            .list_uploads_by_status(UploadStatus::Processing, None, 10)
            .await
            .unwrap();
        assert!(pending.items.is_empty());
        assert_eq!(processing.items[0].id, created.id);
    }
}
