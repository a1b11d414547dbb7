use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use muse_common::ids::parse_uuid;
use uuid::Uuid;

use super::{
    commands::{
        self, DeleteTrackCommand, SetVisibilityCommand, TagTrackCommand, UntagTrackCommand,
        UpdateTrackCommand,
    },
    queries::{self, DownloadTrackQuery, GetTrackQuery, ListTracksQuery, TrackFilter},
};
use crate::{
    api::response::ApiResponse,
    error::{ApiResult, AppError},
    features::{shared::PageParams, FeatureState},
    middleware::Caller,
};

/// Routes mounted at `/owners/:owner_id/tracks`
pub fn tracks_routes() -> Router<FeatureState> {
    Router::new()
        .route("/", get(list_tracks))
        .route(
            "/:track_id",
            get(get_track).patch(update_track).delete(delete_track),
        )
        .route("/:track_id/visibility", put(set_visibility))
        .route("/:track_id/download", get(download_track))
        .route("/:track_id/tags", post(tag_track))
        .route("/:track_id/tags/:tag", delete(untag_track))
}

/// Routes mounted at `/tracks`
pub fn public_routes() -> Router<FeatureState> {
    Router::new().route("/public", get(list_public_tracks))
}

fn track_path(owner_id: &str, track_id: &str) -> Result<(Uuid, Uuid), AppError> {
    Ok((
        parse_uuid("owner_id", owner_id)?,
        parse_uuid("track_id", track_id)?,
    ))
}

#[tracing::instrument(skip(state, caller))]
async fn list_tracks(
    State(state): State<FeatureState>,
    caller: Caller,
    Path(owner_id): Path<String>,
    Query(filter): Query<TrackFilter>,
    Query(page): Query<PageParams>,
) -> ApiResult<Response> {
    let query = ListTracksQuery {
        owner_id: parse_uuid("owner_id", &owner_id)?,
        filter,
        page,
    };
    let response = queries::list::handle(&state.repo, caller.principal(), query).await?;
    Ok(ApiResponse::success(response).into_response())
}

#[tracing::instrument(skip(state))]
async fn list_public_tracks(
    State(state): State<FeatureState>,
    Query(page): Query<PageParams>,
) -> ApiResult<Response> {
    let response = queries::list::handle_public(&state.repo, page).await?;
    Ok(ApiResponse::success(response).into_response())
}

#[tracing::instrument(skip(state, caller))]
async fn get_track(
    State(state): State<FeatureState>,
    caller: Caller,
    Path((owner_id, track_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let (owner_id, track_id) = track_path(&owner_id, &track_id)?;
    let response = queries::get::handle(
        &state.repo,
        caller.principal(),
        GetTrackQuery { owner_id, track_id },
    )
    .await?;
    Ok(ApiResponse::success(response).into_response())
}

#[tracing::instrument(skip(state, caller, command))]
async fn update_track(
    State(state): State<FeatureState>,
    caller: Caller,
    Path((owner_id, track_id)): Path<(String, String)>,
    Json(mut command): Json<UpdateTrackCommand>,
) -> ApiResult<Response> {
    (command.owner_id, command.track_id) = track_path(&owner_id, &track_id)?;
    let response = commands::update::handle(&state.repo, caller.principal(), command)
        .await
        .map_err(AppError::classified)?;
    Ok(ApiResponse::success(response).into_response())
}

#[tracing::instrument(skip(state, caller, command))]
async fn set_visibility(
    State(state): State<FeatureState>,
    caller: Caller,
    Path((owner_id, track_id)): Path<(String, String)>,
    Json(mut command): Json<SetVisibilityCommand>,
) -> ApiResult<Response> {
    (command.owner_id, command.track_id) = track_path(&owner_id, &track_id)?;
    let response = commands::visibility::handle(&state.repo, caller.principal(), command)
        .await
        .map_err(AppError::classified)?;
    Ok(ApiResponse::success(response).into_response())
}

#[tracing::instrument(skip(state, caller))]
async fn delete_track(
    State(state): State<FeatureState>,
    caller: Caller,
    Path((owner_id, track_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let (owner_id, track_id) = track_path(&owner_id, &track_id)?;
    commands::delete::handle(
        &state.repo,
        state.objects.as_ref(),
        caller.principal(),
        DeleteTrackCommand { owner_id, track_id },
    )
    .await
    .map_err(AppError::classified)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[tracing::instrument(skip(state, caller))]
async fn download_track(
    State(state): State<FeatureState>,
    caller: Caller,
    Path((owner_id, track_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let (owner_id, track_id) = track_path(&owner_id, &track_id)?;
    let response = queries::download::handle(
        &state.repo,
        state.objects.as_ref(),
        state.uploads.download_ttl(),
        caller.principal(),
        DownloadTrackQuery { owner_id, track_id },
    )
    .await
    .map_err(AppError::classified)?;
    Ok(ApiResponse::success(response).into_response())
}

#[tracing::instrument(skip(state, caller, command))]
async fn tag_track(
    State(state): State<FeatureState>,
    caller: Caller,
    Path((owner_id, track_id)): Path<(String, String)>,
    Json(mut command): Json<TagTrackCommand>,
) -> ApiResult<Response> {
    (command.owner_id, command.track_id) = track_path(&owner_id, &track_id)?;
    let response = commands::tag::handle(&state.repo, caller.principal(), command)
        .await
        .map_err(AppError::classified)?;
    Ok(ApiResponse::success(response).into_response())
}

#[tracing::instrument(skip(state, caller))]
async fn untag_track(
    State(state): State<FeatureState>,
    caller: Caller,
    Path((owner_id, track_id, tag)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let (owner_id, track_id) = track_path(&owner_id, &track_id)?;
    commands::tag::handle_untag(
        &state.repo,
        caller.principal(),
        UntagTrackCommand {
            owner_id,
            track_id,
            tag,
        },
    )
    .await
    .map_err(AppError::classified)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
