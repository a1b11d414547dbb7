use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    api::response::PageResponse,
    features::shared::PageParams,
    models::{Principal, Track},
    repository::{RepoResult, Repository},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackFilter {
    /// Restrict to one artist
    pub artist: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ListTracksQuery {
    pub owner_id: Uuid,
    pub filter: TrackFilter,
    pub page: PageParams,
}

/// An owner's library, optionally narrowed to one artist.
#[tracing::instrument(skip(repo))]
pub async fn handle(
    repo: &Repository,
    principal: &Principal,
    query: ListTracksQuery,
) -> RepoResult<PageResponse<Track>> {
    let (cursor, limit) = (query.page.cursor(), query.page.limit());
    let page = match query.filter.artist.as_deref().map(str::trim) {
        Some(artist) if !artist.is_empty() => {
            repo.list_tracks_by_artist(principal, &query.owner_id, artist, cursor, limit)
                .await?
        }
        _ => {
            repo.list_tracks(principal, &query.owner_id, cursor, limit)
                .await?
        }
    };
    Ok(page.into())
}

/// Public catalogue, newest first. Needs no principal.
#[tracing::instrument(skip(repo))]
pub async fn handle_public(repo: &Repository, page: PageParams) -> RepoResult<PageResponse<Track>> {
    Ok(repo
        .list_public_tracks(page.cursor(), page.limit())
        .await?
        .into())
}

#[derive(Debug, Clone)]
pub struct ListTracksByTagQuery {
    pub owner_id: Uuid,
    pub tag: String,
    pub page: PageParams,
}

#[tracing::instrument(skip(repo))]
pub async fn handle_by_tag(
    repo: &Repository,
    principal: &Principal,
    query: ListTracksByTagQuery,
) -> RepoResult<PageResponse<Track>> {
    Ok(repo
        .list_tracks_by_tag(
            principal,
            &query.owner_id,
            &query.tag,
            query.page.cursor(),
            query.page.limit(),
        )
        .await?
        .into())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::repository::test_support::{owner_principal, repo, track};

    #[tokio::test]
    async fn test_artist_filter() {
        let repo = repo();
        let principal = owner_principal();
        for (title, artist) in [("One", "Alpha"), ("Two", "Beta"), ("Three", "Alpha")] {
            repo.create_track(track(principal.owner_id, title, artist, 60))
                .await
                .unwrap();
        }
        let query = |artist: Option<&str>| ListTracksQuery {
            owner_id: principal.owner_id,
            filter: TrackFilter {
                artist: artist.map(str::to_string),
            },
            page: PageParams::default(),
        };

        let all = handle(&repo, &principal, query(None)).await.unwrap();
        assert_eq!(all.items.len(), 3);

        let alpha = handle(&repo, &principal, query(Some("Alpha"))).await.unwrap();
        assert_eq!(alpha.items.len(), 2);
        assert!(alpha.items.iter().all(|t| t.artist == "Alpha"));

        let blank = handle(&repo, &principal, query(Some("  "))).await.unwrap();
        assert_eq!(blank.items.len(), 3);
    }
}
