use muse_common::{error::Classify, ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::PlaylistResponse;
use crate::{
    features::shared::{validate_name, NameError},
    models::Principal,
    repository::{playlists::MAX_PLAYLIST_ENTRIES, RepoError, Repository},
};

#[derive(Debug, thiserror::Error)]
pub enum PlaylistCommandError {
    #[error(transparent)]
    InvalidName(#[from] NameError),
    #[error("At least one track id is required")]
    TracksRequired,
    #[error("A playlist holds at most {MAX_PLAYLIST_ENTRIES} tracks")]
    TooManyTracks,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl Classify for PlaylistCommandError {
    fn kind(&self) -> ErrorKind {
        match self {
            PlaylistCommandError::Repo(e) => e.kind(),
            _ => ErrorKind::Validation,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePlaylistCommand {
    #[serde(skip)]
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

impl CreatePlaylistCommand {
    pub fn validate(&self) -> Result<(), PlaylistCommandError> {
        validate_name("name", &self.name)?;
        Ok(())
    }
}

#[tracing::instrument(skip(repo))]
pub async fn create(
    repo: &Repository,
    principal: &Principal,
    command: CreatePlaylistCommand,
) -> Result<PlaylistResponse, PlaylistCommandError> {
    command.validate()?;
    let playlist = repo
        .create_playlist(
            principal,
            &command.owner_id,
            command.name.trim(),
            command.description,
        )
        .await?;
    Ok(PlaylistResponse::new(playlist, None))
}

/// What to do with a batch of tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryChange {
    Add,
    Remove,
    Reorder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEntriesCommand {
    #[serde(skip)]
    pub owner_id: Uuid,
    #[serde(skip)]
    pub playlist_id: Uuid,
    pub track_ids: Vec<Uuid>,
}

impl ChangeEntriesCommand {
    pub fn validate(&self, change: EntryChange) -> Result<(), PlaylistCommandError> {
        if self.track_ids.is_empty() && change != EntryChange::Reorder {
            return Err(PlaylistCommandError::TracksRequired);
        }
        if self.track_ids.len() > MAX_PLAYLIST_ENTRIES {
            return Err(PlaylistCommandError::TooManyTracks);
        }
        Ok(())
    }
}

/// Add, remove, or reorder entries and return the playlist with its new
/// entry list.
#[tracing::instrument(skip(repo, command), fields(playlist_id = %command.playlist_id, count = command.track_ids.len()))]
pub async fn change_entries(
    repo: &Repository,
    principal: &Principal,
    change: EntryChange,
    command: ChangeEntriesCommand,
) -> Result<PlaylistResponse, PlaylistCommandError> {
    command.validate(change)?;
    let (owner_id, playlist_id) = (&command.owner_id, &command.playlist_id);
    let playlist = match change {
        EntryChange::Add => {
            repo.add_tracks(principal, owner_id, playlist_id, &command.track_ids)
                .await?
        }
        EntryChange::Remove => {
            repo.remove_tracks(principal, owner_id, playlist_id, &command.track_ids)
                .await?
        }
        EntryChange::Reorder => {
            repo.reorder(principal, owner_id, playlist_id, &command.track_ids)
                .await?
        }
    };
    let entries = repo.list_entries(principal, owner_id, playlist_id).await?;
    Ok(PlaylistResponse::new(playlist, Some(entries)))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletePlaylistCommand {
    pub owner_id: Uuid,
    pub playlist_id: Uuid,
}

#[tracing::instrument(skip(repo))]
pub async fn delete(
    repo: &Repository,
    principal: &Principal,
    command: DeletePlaylistCommand,
) -> Result<(), PlaylistCommandError> {
    repo.delete_playlist(principal, &command.owner_id, &command.playlist_id)
        .await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::repository::test_support::{owner_principal, repo, track};

    #[test]
    fn test_entry_validation() {
        let command = |n: usize| ChangeEntriesCommand {
            owner_id: Uuid::new_v4(),
            playlist_id: Uuid::new_v4(),
            track_ids: (0..n).map(|_| Uuid::new_v4()).collect(),
        };
        assert!(matches!(
            command(0).validate(EntryChange::Add),
            Err(PlaylistCommandError::TracksRequired)
        ));
        assert!(command(0).validate(EntryChange::Reorder).is_ok());
        assert!(matches!(
            command(MAX_PLAYLIST_ENTRIES + 1).validate(EntryChange::Add),
            Err(PlaylistCommandError::TooManyTracks)
        ));
    }

    #[test]
    fn test_blank_name_rejected() {
        let command = CreatePlaylistCommand {
            owner_id: Uuid::new_v4(),
            name: " ".to_string(),
            description: None,
        };
        let err = command.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_add_reorder_remove() {
        let repo = repo();
        let principal = owner_principal();
        let owner_id = principal.owner_id;
        let mut ids = Vec::new();
        for (title, duration) in [("A", 60), ("B", 90), ("C", 30)] {
            ids.push(
                repo.create_track(track(owner_id, title, "Band", duration))
                    .await
                    .unwrap()
                    .id,
            );
        }
        let created = create(
            &repo,
            &principal,
            CreatePlaylistCommand {
                owner_id,
                name: "Mix".to_string(),
                description: None,
            },
        )
        .await
        .unwrap();
        let command = |track_ids: Vec<Uuid>| ChangeEntriesCommand {
            owner_id,
            playlist_id: created.playlist.id,
            track_ids,
        };

        let added = change_entries(&repo, &principal, EntryChange::Add, command(ids.clone()))
            .await
            .unwrap();
        assert_eq!(added.playlist.track_count, 3);
        assert_eq!(added.playlist.total_duration_secs, 180);

        let reordered = change_entries(
            &repo,
            &principal,
            EntryChange::Reorder,
            command(vec![ids[2], ids[0]]),
        )
        .await
        .unwrap();
        let order: Vec<Uuid> = reordered
            .entries
            .unwrap()
            .iter()
            .map(|e| e.track_id)
            .collect();
        assert_eq!(order, vec![ids[2], ids[0], ids[1]]);

        let removed = change_entries(&repo, &principal, EntryChange::Remove, command(vec![ids[1]]))
            .await
            .unwrap();
        assert_eq!(removed.playlist.track_count, 2);
        assert_eq!(removed.playlist.total_duration_secs, 90);
    }
}
