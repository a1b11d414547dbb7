use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    features::tracks::types::TrackResponse,
    models::Principal,
    repository::{RepoResult, Repository},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTrackQuery {
    pub owner_id: Uuid,
    pub track_id: Uuid,
}

#[tracing::instrument(skip(repo))]
pub async fn handle(
    repo: &Repository,
    principal: &Principal,
    query: GetTrackQuery,
) -> RepoResult<TrackResponse> {
    let track = repo
        .get_track(principal, &query.owner_id, &query.track_id)
        .await?;
    Ok(track.into())
}
