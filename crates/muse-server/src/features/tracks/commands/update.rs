use muse_common::{error::Classify, ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    features::tracks::types::TrackResponse,
    models::{Principal, TrackPatch},
    repository::{RepoError, Repository},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTrackCommand {
    #[serde(skip)]
    pub owner_id: Uuid,
    #[serde(skip)]
    pub track_id: Uuid,
    /// Version the client last read
    pub expected_version: u64,
    #[serde(flatten)]
    pub patch: TrackPatch,
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateTrackError {
    #[error("Invalid track update: {0}")]
    InvalidPatch(String),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl Classify for UpdateTrackError {
    fn kind(&self) -> ErrorKind {
        match self {
            UpdateTrackError::InvalidPatch(_) => ErrorKind::Validation,
            UpdateTrackError::Repo(e) => e.kind(),
        }
    }
}

impl UpdateTrackCommand {
    pub fn validate(&self) -> Result<(), UpdateTrackError> {
        self.patch.validate().map_err(UpdateTrackError::InvalidPatch)
    }
}

/// Apply an owner edit if nobody changed the track since it was read.
///
/// A stale `expected_version` is a conflict; the client re-reads and
/// decides.
#[tracing::instrument(skip(repo, command), fields(track_id = %command.track_id, expected_version = command.expected_version))]
pub async fn handle(
    repo: &Repository,
    principal: &Principal,
    command: UpdateTrackCommand,
) -> Result<TrackResponse, UpdateTrackError> {
    command.validate()?;
    let updated = repo
        .update_track(
            principal,
            &command.owner_id,
            &command.track_id,
            command.expected_version,
            &command.patch,
        )
        .await?;
    Ok(updated.into())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::repository::test_support::{owner_principal, repo, track};

    fn rename(owner_id: Uuid, track_id: Uuid, expected_version: u64, title: &str) -> UpdateTrackCommand {
        UpdateTrackCommand {
            owner_id,
            track_id,
            expected_version,
            patch: TrackPatch {
                title: Some(title.to_string()),
                ..TrackPatch::default()
            },
        }
    }

    #[test]
    fn test_empty_patch_rejected() {
        let command = UpdateTrackCommand {
            owner_id: Uuid::new_v4(),
            track_id: Uuid::new_v4(),
            expected_version: 1,
            patch: TrackPatch::default(),
        };
        assert!(matches!(
            command.validate(),
            Err(UpdateTrackError::InvalidPatch(_))
        ));
    }

    #[test]
    fn test_body_shape() {
        let command: UpdateTrackCommand =
            serde_json::from_str(r#"{"expected_version": 3, "title": "New", "bpm": 120.0}"#)
                .unwrap();
        assert_eq!(command.expected_version, 3);
        assert_eq!(command.patch.title.as_deref(), Some("New"));
        assert_eq!(command.patch.bpm, Some(120.0));
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let repo = repo();
        let principal = owner_principal();
        let created = repo
            .create_track(track(principal.owner_id, "Old", "Band", 100))
            .await
            .unwrap();

        let first = handle(
            &repo,
            &principal,
            rename(principal.owner_id, created.id, created.version, "First"),
        )
        .await
        .unwrap();
        assert_eq!(first.track.title, "First");
        assert_eq!(first.version, created.version + 1);

        let err = handle(
            &repo,
            &principal,
            rename(principal.owner_id, created.id, created.version, "Second"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}
