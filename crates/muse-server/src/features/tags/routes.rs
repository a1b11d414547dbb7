use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use muse_common::ids::parse_uuid;

use super::{
    commands::{self, CreateTagCommand, DeleteTagCommand},
    queries,
};
use crate::{
    api::response::ApiResponse,
    error::{ApiResult, AppError},
    features::{
        shared::PageParams,
        tracks::{queries::list as track_list, ListTracksByTagQuery},
        FeatureState,
    },
    middleware::Caller,
};

/// Routes mounted at `/owners/:owner_id/tags`
pub fn tags_routes() -> Router<FeatureState> {
    Router::new()
        .route("/", get(list_tags).post(create_tag))
        .route("/:tag", delete(delete_tag))
        .route("/:tag/tracks", get(list_tracks_by_tag))
}

#[tracing::instrument(skip(state, caller))]
async fn list_tags(
    State(state): State<FeatureState>,
    caller: Caller,
    Path(owner_id): Path<String>,
) -> ApiResult<Response> {
    let owner_id = parse_uuid("owner_id", &owner_id)?;
    let tags = queries::list(&state.repo, caller.principal(), owner_id).await?;
    Ok(ApiResponse::success(tags).into_response())
}

#[tracing::instrument(skip(state, caller, command))]
async fn create_tag(
    State(state): State<FeatureState>,
    caller: Caller,
    Path(owner_id): Path<String>,
    Json(mut command): Json<CreateTagCommand>,
) -> ApiResult<Response> {
    command.owner_id = parse_uuid("owner_id", &owner_id)?;
    let tag = commands::create(&state.repo, caller.principal(), command)
        .await
        .map_err(AppError::classified)?;
    Ok(ApiResponse::created(tag))
}

#[tracing::instrument(skip(state, caller))]
async fn delete_tag(
    State(state): State<FeatureState>,
    caller: Caller,
    Path((owner_id, name)): Path<(String, String)>,
) -> ApiResult<Response> {
    let command = DeleteTagCommand {
        owner_id: parse_uuid("owner_id", &owner_id)?,
        name,
    };
    let response = commands::delete(&state.repo, caller.principal(), command)
        .await
        .map_err(AppError::classified)?;
    Ok(ApiResponse::success(response).into_response())
}

#[tracing::instrument(skip(state, caller))]
async fn list_tracks_by_tag(
    State(state): State<FeatureState>,
    caller: Caller,
    Path((owner_id, tag)): Path<(String, String)>,
    Query(page): Query<PageParams>,
) -> ApiResult<Response> {
    let query = ListTracksByTagQuery {
        owner_id: parse_uuid("owner_id", &owner_id)?,
        tag,
        page,
    };
    let response = track_list::handle_by_tag(&state.repo, caller.principal(), query).await?;
    Ok(ApiResponse::success(response).into_response())
}
