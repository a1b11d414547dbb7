use uuid::Uuid;

use crate::{
    models::{Principal, Tag},
    repository::{RepoResult, Repository},
};

/// Every tag the owner has defined, by name.
#[tracing::instrument(skip(repo))]
pub async fn list(repo: &Repository, principal: &Principal, owner_id: Uuid) -> RepoResult<Vec<Tag>> {
    repo.list_tags(principal, &owner_id).await
}
