use muse_common::{error::Classify, ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    features::tracks::types::TrackResponse,
    models::{Principal, Visibility},
    repository::{RepoError, Repository},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetVisibilityCommand {
    #[serde(skip)]
    pub owner_id: Uuid,
    #[serde(skip)]
    pub track_id: Uuid,
    pub visibility: Visibility,
}

#[derive(Debug, thiserror::Error)]
pub enum SetVisibilityError {
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl Classify for SetVisibilityError {
    fn kind(&self) -> ErrorKind {
        match self {
            SetVisibilityError::Repo(e) => e.kind(),
        }
    }
}

#[tracing::instrument(skip(repo))]
pub async fn handle(
    repo: &Repository,
    principal: &Principal,
    command: SetVisibilityCommand,
) -> Result<TrackResponse, SetVisibilityError> {
    let track = repo
        .set_visibility(
            principal,
            &command.owner_id,
            &command.track_id,
            command.visibility,
        )
        .await?;
    tracing::info!(visibility = ?track.visibility, "Track visibility changed");
    Ok(track.into())
}
