use chrono::{DateTime, Utc};
use muse_common::{error::Classify, ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::UploadConfig,
    features::shared::validation::MAX_NAME_LEN,
    models::{Principal, Upload},
    objects::{ObjectStore, ObjectStoreError},
    repository::{RepoError, Repository},
};

/// Content types accepted for upload
pub const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/flac",
    "audio/x-flac",
    "audio/wav",
    "audio/x-wav",
    "audio/aac",
    "audio/mp4",
    "audio/ogg",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresignUploadCommand {
    pub file_name: String,
    pub file_size: u64,
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresignUploadResponse {
    pub upload_id: Uuid,
    pub upload_url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum PresignUploadError {
    #[error("File name is required and cannot be empty")]
    FileNameRequired,
    #[error("File name must not exceed {MAX_NAME_LEN} characters")]
    FileNameLength,
    #[error("File name must not contain path separators")]
    FileNamePath,
    #[error("File is empty")]
    EmptyFile,
    #[error("File size {size} exceeds the limit of {max} bytes")]
    FileTooLarge { size: u64, max: u64 },
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),
    #[error("Storage quota exceeded: {available} bytes available, {requested} requested")]
    QuotaExceeded { available: u64, requested: u64 },
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Objects(#[from] ObjectStoreError),
}

impl Classify for PresignUploadError {
    fn kind(&self) -> ErrorKind {
        match self {
            PresignUploadError::Repo(e) => e.kind(),
            PresignUploadError::Objects(e) => e.kind(),
            _ => ErrorKind::Validation,
        }
    }
}

impl PresignUploadCommand {
    pub fn validate(&self, max_file_size: u64) -> Result<(), PresignUploadError> {
        if self.file_name.trim().is_empty() {
            return Err(PresignUploadError::FileNameRequired);
        }
        if self.file_name.chars().count() > MAX_NAME_LEN {
            return Err(PresignUploadError::FileNameLength);
        }
        if self.file_name.contains(['/', '\\']) {
            return Err(PresignUploadError::FileNamePath);
        }
        if self.file_size == 0 {
            return Err(PresignUploadError::EmptyFile);
        }
        if self.file_size > max_file_size {
            return Err(PresignUploadError::FileTooLarge {
                size: self.file_size,
                max: max_file_size,
            });
        }
        if !ALLOWED_CONTENT_TYPES.contains(&self.content_type.as_str()) {
            return Err(PresignUploadError::UnsupportedContentType(
                self.content_type.clone(),
            ));
        }
        Ok(())
    }
}

/// Record a pending upload and hand back a write URL for its staging key.
///
/// The owner record is provisioned on first upload when the caller's email
/// is known.
#[tracing::instrument(skip(repo, objects, config, command), fields(owner_id = %principal.owner_id, file_name = %command.file_name))]
pub async fn handle(
    repo: &Repository,
    objects: &dyn ObjectStore,
    config: &UploadConfig,
    principal: &Principal,
    email: Option<&str>,
    command: PresignUploadCommand,
) -> Result<PresignUploadResponse, PresignUploadError> {
    command.validate(config.max_file_size)?;

    let owner = match email {
        Some(email) => repo.get_or_create_owner(principal, email, None).await?,
        None => repo.get_owner(principal, &principal.owner_id).await?,
    };
    let available = owner.storage_available();
    if command.file_size > available {
        return Err(PresignUploadError::QuotaExceeded {
            available,
            requested: command.file_size,
        });
    }

    let upload = Upload::new(
        principal.owner_id,
        command.file_name.trim(),
        command.file_size,
        &command.content_type,
    );
    let upload = repo.create_upload(principal, upload).await?;

    let presigned = objects
        .presign_upload(&upload.object_key, &upload.content_type, config.url_ttl())
        .await?;

    tracing::info!(upload_id = %upload.id, "Upload presigned");

    Ok(PresignUploadResponse {
        upload_id: upload.id,
        upload_url: presigned.url,
        expires_at: presigned.expires_at,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{
        models::{PipelineState, Role},
        objects::MemoryObjectStore,
        repository::test_support::repo,
    };

    fn command(file_name: &str, file_size: u64, content_type: &str) -> PresignUploadCommand {
        PresignUploadCommand {
            file_name: file_name.to_string(),
            file_size,
            content_type: content_type.to_string(),
        }
    }

    #[test]
    fn test_validation_success() {
        assert!(command("song.mp3", 1024, "audio/mpeg").validate(1 << 30).is_ok());
    }

    #[test]
    fn test_validation_file_name() {
        assert!(matches!(
            command("  ", 1, "audio/mpeg").validate(10),
            Err(PresignUploadError::FileNameRequired)
        ));
        assert!(matches!(
            command(&"a".repeat(256), 1, "audio/mpeg").validate(10),
            Err(PresignUploadError::FileNameLength)
        ));
        assert!(matches!(
            command("../etc/passwd", 1, "audio/mpeg").validate(10),
            Err(PresignUploadError::FileNamePath)
        ));
        assert!(matches!(
            command("dir\\song.mp3", 1, "audio/mpeg").validate(10),
            Err(PresignUploadError::FileNamePath)
        ));
    }

    #[test]
    fn test_validation_size_bounds() {
        assert!(matches!(
            command("song.mp3", 0, "audio/mpeg").validate(10),
            Err(PresignUploadError::EmptyFile)
        ));
        assert!(command("song.mp3", 10, "audio/mpeg").validate(10).is_ok());
        assert!(matches!(
            command("song.mp3", 11, "audio/mpeg").validate(10),
            Err(PresignUploadError::FileTooLarge { size: 11, max: 10 })
        ));
    }

    #[test]
    fn test_validation_content_type() {
        let err = command("song.mp3", 1, "video/mp4").validate(10).unwrap_err();
        assert!(matches!(err, PresignUploadError::UnsupportedContentType(_)));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_presign_creates_pending_upload() {
        let repo = repo();
        let objects = MemoryObjectStore::default();
        let principal = Principal::new(Uuid::new_v4(), Role::Subscriber);

        let response = handle(
            &repo,
            &objects,
            &UploadConfig::default(),
            &principal,
            Some("listener@example.com"),
            command("Song.mp3", 4096, "audio/mpeg"),
        )
        .await
        .unwrap();

        let upload = repo
            .get_upload(&principal, &principal.owner_id, &response.upload_id)
            .await
            .unwrap();
        assert_eq!(upload.state, PipelineState::Pending);
        assert_eq!(
            upload.object_key,
            format!("uploads/{}/{}/Song.mp3", principal.owner_id, upload.id)
        );
        assert!(response.upload_url.contains(&upload.object_key));
        assert!(response.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn test_quota_exceeded() {
        let repo = repo();
        let objects = MemoryObjectStore::default();
        let principal = Principal::new(Uuid::new_v4(), Role::Subscriber);
        let owner = repo
            .get_or_create_owner(&principal, "full@example.com", None)
            .await
            .unwrap();
        repo.record_storage(&principal.owner_id, owner.storage_limit as i64 - 10, 1)
            .await
            .unwrap();

        let err = handle(
            &repo,
            &objects,
            &UploadConfig::default(),
            &principal,
            None,
            command("big.flac", 11, "audio/flac"),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            PresignUploadError::QuotaExceeded {
                available: 10,
                requested: 11
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_owner_without_email() {
        let err = handle(
            &repo(),
            &MemoryObjectStore::default(),
            &UploadConfig::default(),
            &Principal::new(Uuid::new_v4(), Role::Subscriber),
            None,
            command("song.mp3", 1, "audio/mpeg"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
