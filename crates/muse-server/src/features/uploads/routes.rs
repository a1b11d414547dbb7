use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use muse_common::ids::parse_uuid;
use serde::Deserialize;

use super::{
    commands::{self, ConfirmUploadCommand, PresignUploadCommand, ReprocessUploadCommand},
    queries::{self, GetUploadQuery, ListUploadsQuery},
};
use crate::{
    api::response::ApiResponse,
    error::{ApiResult, AppError},
    features::{shared::PageParams, FeatureState},
    middleware::Caller,
    models::ProcessingStep,
};

pub fn uploads_routes() -> Router<FeatureState> {
    Router::new()
        .route("/", get(list_uploads))
        .route("/presign", post(presign_upload))
        .route("/:upload_id", get(get_upload))
        .route("/:upload_id/confirm", post(confirm_upload))
        .route("/:upload_id/reprocess", post(reprocess_upload))
}

#[derive(Debug, Default, Deserialize)]
struct ReprocessRequest {
    from_step: Option<ProcessingStep>,
}

#[tracing::instrument(skip(state, caller, command), fields(owner_id = %caller.principal.owner_id))]
async fn presign_upload(
    State(state): State<FeatureState>,
    caller: Caller,
    Json(command): Json<PresignUploadCommand>,
) -> ApiResult<Response> {
    let response = commands::presign::handle(
        &state.repo,
        state.objects.as_ref(),
        &state.uploads,
        caller.principal(),
        caller.email.as_deref(),
        command,
    )
    .await
    .map_err(AppError::classified)?;

    Ok(ApiResponse::created(response))
}

#[tracing::instrument(skip(state, caller), fields(owner_id = %caller.principal.owner_id))]
async fn confirm_upload(
    State(state): State<FeatureState>,
    caller: Caller,
    Path(upload_id): Path<String>,
) -> ApiResult<Response> {
    let command = ConfirmUploadCommand {
        upload_id: parse_uuid("upload_id", &upload_id)?,
    };
    let response = commands::confirm::handle(
        &state.repo,
        state.objects.as_ref(),
        &state.pipeline,
        caller.principal(),
        command,
    )
    .await
    .map_err(AppError::classified)?;

    Ok(ApiResponse::success(response).into_response())
}

#[tracing::instrument(skip(state, caller, body), fields(owner_id = %caller.principal.owner_id))]
async fn reprocess_upload(
    State(state): State<FeatureState>,
    caller: Caller,
    Path(upload_id): Path<String>,
    body: Option<Json<ReprocessRequest>>,
) -> ApiResult<Response> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let command = ReprocessUploadCommand {
        upload_id: parse_uuid("upload_id", &upload_id)?,
        from_step: request
            .from_step
            .unwrap_or(ProcessingStep::MetadataExtracted),
    };
    let response =
        commands::reprocess::handle(&state.repo, &state.pipeline, caller.principal(), command)
            .await
            .map_err(AppError::classified)?;

    Ok(ApiResponse::created(response))
}

#[tracing::instrument(skip(state, caller), fields(owner_id = %caller.principal.owner_id))]
async fn get_upload(
    State(state): State<FeatureState>,
    caller: Caller,
    Path(upload_id): Path<String>,
) -> ApiResult<Response> {
    let query = GetUploadQuery {
        upload_id: parse_uuid("upload_id", &upload_id)?,
    };
    let response = queries::status::handle(&state.repo, caller.principal(), query).await?;
    Ok(ApiResponse::success(response).into_response())
}

#[tracing::instrument(skip(state, caller), fields(owner_id = %caller.principal.owner_id))]
async fn list_uploads(
    State(state): State<FeatureState>,
    caller: Caller,
    Query(page): Query<PageParams>,
) -> ApiResult<Response> {
    let response =
        queries::list::handle(&state.repo, caller.principal(), ListUploadsQuery { page }).await?;
    Ok(ApiResponse::success(response).into_response())
}
