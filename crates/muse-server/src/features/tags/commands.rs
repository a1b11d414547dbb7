use muse_common::{error::Classify, ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    models::{Principal, Tag},
    repository::{RepoError, Repository},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTagCommand {
    #[serde(skip)]
    pub owner_id: Uuid,
    pub name: String,
    /// Display colour, `#rrggbb`
    pub color: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TagCommandError {
    #[error("Color must be a #rrggbb hex value")]
    InvalidColor,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl Classify for TagCommandError {
    fn kind(&self) -> ErrorKind {
        match self {
            TagCommandError::InvalidColor => ErrorKind::Validation,
            TagCommandError::Repo(e) => e.kind(),
        }
    }
}

impl CreateTagCommand {
    pub fn validate(&self) -> Result<(), TagCommandError> {
        if let Some(color) = &self.color {
            let hex = color.strip_prefix('#').unwrap_or_default();
            if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(TagCommandError::InvalidColor);
            }
        }
        Ok(())
    }
}

/// Idempotent: an existing tag is returned unchanged.
#[tracing::instrument(skip(repo))]
pub async fn create(
    repo: &Repository,
    principal: &Principal,
    command: CreateTagCommand,
) -> Result<Tag, TagCommandError> {
    command.validate()?;
    let tag = repo
        .create_tag(principal, &command.owner_id, &command.name, command.color)
        .await?;
    Ok(tag.value)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteTagCommand {
    pub owner_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteTagResponse {
    pub name: String,
    /// Tracks the tag was removed from
    pub detached: usize,
}

#[tracing::instrument(skip(repo))]
pub async fn delete(
    repo: &Repository,
    principal: &Principal,
    command: DeleteTagCommand,
) -> Result<DeleteTagResponse, TagCommandError> {
    let detached = repo
        .delete_tag(principal, &command.owner_id, &command.name)
        .await?;
    Ok(DeleteTagResponse {
        name: command.name,
        detached,
    })
}
