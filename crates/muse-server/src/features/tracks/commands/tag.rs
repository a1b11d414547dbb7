use muse_common::{error::Classify, ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    features::tracks::types::TrackResponse,
    models::Principal,
    repository::{tags::MAX_TAGS_PER_TRACK, RepoError, Repository},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagTrackCommand {
    #[serde(skip)]
    pub owner_id: Uuid,
    #[serde(skip)]
    pub track_id: Uuid,
    pub tags: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TagTrackError {
    #[error("At least one tag is required")]
    TagsRequired,
    #[error("A track carries at most {MAX_TAGS_PER_TRACK} tags")]
    TooManyTags,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl Classify for TagTrackError {
    fn kind(&self) -> ErrorKind {
        match self {
            TagTrackError::TagsRequired | TagTrackError::TooManyTags => ErrorKind::Validation,
            TagTrackError::Repo(e) => e.kind(),
        }
    }
}

impl TagTrackCommand {
    pub fn validate(&self) -> Result<(), TagTrackError> {
        if self.tags.is_empty() {
            return Err(TagTrackError::TagsRequired);
        }
        if self.tags.len() > MAX_TAGS_PER_TRACK {
            return Err(TagTrackError::TooManyTags);
        }
        Ok(())
    }
}

/// Attach tags, creating the ones the owner does not have yet.
#[tracing::instrument(skip(repo))]
pub async fn handle(
    repo: &Repository,
    principal: &Principal,
    command: TagTrackCommand,
) -> Result<TrackResponse, TagTrackError> {
    command.validate()?;
    let track = repo
        .add_tags_to_track(principal, &command.owner_id, &command.track_id, &command.tags)
        .await?;
    Ok(track.into())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UntagTrackCommand {
    pub owner_id: Uuid,
    pub track_id: Uuid,
    pub tag: String,
}

#[tracing::instrument(skip(repo))]
pub async fn handle_untag(
    repo: &Repository,
    principal: &Principal,
    command: UntagTrackCommand,
) -> Result<(), TagTrackError> {
    repo.remove_tag_from_track(principal, &command.owner_id, &command.track_id, &command.tag)
        .await?;
    Ok(())
}
