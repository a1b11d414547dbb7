use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use muse_common::ids::parse_uuid;
use uuid::Uuid;

use super::{
    commands::{
        self, ChangeEntriesCommand, CreatePlaylistCommand, DeletePlaylistCommand, EntryChange,
    },
    queries::{self, GetPlaylistQuery},
};
use crate::{
    api::response::ApiResponse,
    error::{ApiResult, AppError},
    features::{shared::PageParams, FeatureState},
    middleware::Caller,
};

/// Routes mounted at `/owners/:owner_id/playlists`
pub fn playlists_routes() -> Router<FeatureState> {
    Router::new()
        .route("/", get(list_playlists).post(create_playlist))
        .route("/:playlist_id", get(get_playlist).delete(delete_playlist))
        .route("/:playlist_id/tracks", put(add_tracks).delete(remove_tracks))
        .route("/:playlist_id/order", put(reorder_tracks))
}

fn playlist_path(owner_id: &str, playlist_id: &str) -> Result<(Uuid, Uuid), AppError> {
    Ok((
        parse_uuid("owner_id", owner_id)?,
        parse_uuid("playlist_id", playlist_id)?,
    ))
}

#[tracing::instrument(skip(state, caller))]
async fn list_playlists(
    State(state): State<FeatureState>,
    caller: Caller,
    Path(owner_id): Path<String>,
    Query(page): Query<PageParams>,
) -> ApiResult<Response> {
    let owner_id = parse_uuid("owner_id", &owner_id)?;
    let response = queries::list(&state.repo, caller.principal(), owner_id, page).await?;
    Ok(ApiResponse::success(response).into_response())
}

#[tracing::instrument(skip(state, caller, command))]
async fn create_playlist(
    State(state): State<FeatureState>,
    caller: Caller,
    Path(owner_id): Path<String>,
    Json(mut command): Json<CreatePlaylistCommand>,
) -> ApiResult<Response> {
    command.owner_id = parse_uuid("owner_id", &owner_id)?;
    let response = commands::create(&state.repo, caller.principal(), command)
        .await
        .map_err(AppError::classified)?;
    Ok(ApiResponse::created(response))
}

#[tracing::instrument(skip(state, caller))]
async fn get_playlist(
    State(state): State<FeatureState>,
    caller: Caller,
    Path((owner_id, playlist_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let (owner_id, playlist_id) = playlist_path(&owner_id, &playlist_id)?;
    let response = queries::get(
        &state.repo,
        caller.principal(),
        GetPlaylistQuery {
            owner_id,
            playlist_id,
        },
    )
    .await?;
    Ok(ApiResponse::success(response).into_response())
}

#[tracing::instrument(skip(state, caller))]
async fn delete_playlist(
    State(state): State<FeatureState>,
    caller: Caller,
    Path((owner_id, playlist_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let (owner_id, playlist_id) = playlist_path(&owner_id, &playlist_id)?;
    commands::delete(
        &state.repo,
        caller.principal(),
        DeletePlaylistCommand {
            owner_id,
            playlist_id,
        },
    )
    .await
    .map_err(AppError::classified)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn change_entries(
    state: FeatureState,
    caller: Caller,
    (owner_id, playlist_id): (String, String),
    change: EntryChange,
    mut command: ChangeEntriesCommand,
) -> ApiResult<Response> {
    (command.owner_id, command.playlist_id) = playlist_path(&owner_id, &playlist_id)?;
    let response = commands::change_entries(&state.repo, caller.principal(), change, command)
        .await
        .map_err(AppError::classified)?;
    Ok(ApiResponse::success(response).into_response())
}

async fn add_tracks(
    State(state): State<FeatureState>,
    caller: Caller,
    Path(path): Path<(String, String)>,
    Json(command): Json<ChangeEntriesCommand>,
) -> ApiResult<Response> {
    change_entries(state, caller, path, EntryChange::Add, command).await
}

async fn remove_tracks(
    State(state): State<FeatureState>,
    caller: Caller,
    Path(path): Path<(String, String)>,
    Json(command): Json<ChangeEntriesCommand>,
) -> ApiResult<Response> {
    change_entries(state, caller, path, EntryChange::Remove, command).await
}

async fn reorder_tracks(
    State(state): State<FeatureState>,
    caller: Caller,
    Path(path): Path<(String, String)>,
    Json(command): Json<ChangeEntriesCommand>,
) -> ApiResult<Response> {
    change_entries(state, caller, path, EntryChange::Reorder, command).await
}
