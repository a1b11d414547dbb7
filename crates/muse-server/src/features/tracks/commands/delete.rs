use muse_common::{error::Classify, ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    models::Principal,
    objects::ObjectStore,
    repository::{RepoError, Repository},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteTrackCommand {
    pub owner_id: Uuid,
    pub track_id: Uuid,
}

#[derive(Debug, thiserror::Error)]
pub enum DeleteTrackError {
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl Classify for DeleteTrackError {
    fn kind(&self) -> ErrorKind {
        match self {
            DeleteTrackError::Repo(e) => e.kind(),
        }
    }
}

/// Remove the track record, then its media and artwork.
///
/// Object removal happens after the record is gone and its failures are
/// only logged; an orphaned object is unreachable.
#[tracing::instrument(skip(repo, objects))]
pub async fn handle(
    repo: &Repository,
    objects: &dyn ObjectStore,
    principal: &Principal,
    command: DeleteTrackCommand,
) -> Result<(), DeleteTrackError> {
    let track = repo
        .delete_track(principal, &command.owner_id, &command.track_id)
        .await?;

    for key in std::iter::once(&track.object_key).chain(track.cover_art_key.as_ref()) {
        if let Err(e) = objects.delete_object(key).await {
            tracing::warn!(key = %key, error = %e, "Failed to delete track object");
        }
    }
    Ok(())
}
