use super::status::UploadStatusResponse;
use crate::{
    api::response::PageResponse,
    features::shared::PageParams,
    models::Principal,
    repository::{RepoResult, Repository},
};

#[derive(Debug, Clone, Default)]
pub struct ListUploadsQuery {
    pub page: PageParams,
}

/// The caller's uploads, newest attempt last.
#[tracing::instrument(skip(repo))]
pub async fn handle(
    repo: &Repository,
    principal: &Principal,
    query: ListUploadsQuery,
) -> RepoResult<PageResponse<UploadStatusResponse>> {
    let page = repo
        .list_uploads(
            principal,
            &principal.owner_id,
            query.page.cursor(),
            query.page.limit(),
        )
        .await?;
    Ok(PageResponse::from_page(page, UploadStatusResponse::from))
}
