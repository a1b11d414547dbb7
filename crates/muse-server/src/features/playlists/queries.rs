use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::PlaylistResponse;
use crate::{
    api::response::PageResponse,
    features::shared::PageParams,
    models::{Playlist, Principal},
    repository::{RepoResult, Repository},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPlaylistQuery {
    pub owner_id: Uuid,
    pub playlist_id: Uuid,
}

/// A playlist with its entries in order.
#[tracing::instrument(skip(repo))]
pub async fn get(
    repo: &Repository,
    principal: &Principal,
    query: GetPlaylistQuery,
) -> RepoResult<PlaylistResponse> {
    let playlist = repo
        .get_playlist(principal, &query.owner_id, &query.playlist_id)
        .await?;
    let entries = repo
        .list_entries(principal, &query.owner_id, &query.playlist_id)
        .await?;
    Ok(PlaylistResponse::new(playlist, Some(entries)))
}

#[tracing::instrument(skip(repo))]
pub async fn list(
    repo: &Repository,
    principal: &Principal,
    owner_id: Uuid,
    page: PageParams,
) -> RepoResult<PageResponse<Playlist>> {
    Ok(repo
        .list_playlists(principal, &owner_id, page.cursor(), page.limit())
        .await?
        .into())
}
