//! Stage dispatch and the shared guard around every stage
//!
//! [`invoke_stage`] owns everything common to the six stages: id
//! validation, the skip and prerequisite checks, the per-stage time budget,
//! and the final conditional write that records the stage's flag together
//! with its outputs.

use async_trait::async_trait;
use muse_common::ids::{parse_uuid, validate_object_key};
use tracing::{debug, info, instrument};

use super::{
    types::{PipelineStage, StageError, StageOutcome, UploadRef},
    PipelineContext,
};
use crate::{
    models::{keys, PipelineState, Upload, Versioned},
    repository::RepoError,
    table::validate_key,
};

mod cover;
mod finalize;
mod index;
mod metadata;
mod relocate;
mod track;

/// One pipeline step.
///
/// `run` receives the upload as last read and returns it with the stage's
/// outputs applied. The returned version is the one the recording write is
/// conditioned on, so a stage that persists an intermediate value returns
/// the version of that write.
#[async_trait]
trait Stage: Send + Sync {
    async fn run(
        &self,
        ctx: &PipelineContext,
        upload: Versioned<Upload>,
    ) -> Result<Versioned<Upload>, StageError>;
}

fn stage_for(kind: PipelineStage) -> &'static dyn Stage {
    match kind {
        PipelineStage::Metadata => &metadata::MetadataStage,
        PipelineStage::CoverArt => &cover::CoverArtStage,
        PipelineStage::TrackRecord => &track::TrackRecordStage,
        PipelineStage::Relocation => &relocate::RelocationStage,
        PipelineStage::Indexing => &index::IndexingStage,
        PipelineStage::Finalization => &finalize::FinalizationStage,
    }
}

/// Run one stage for one upload.
///
/// Returns `Skipped` when the stage already ran or the upload is terminal.
/// Re-invoking a completed stage is a no-op.
#[instrument(skip(ctx), fields(stage = %kind, upload = %upload_ref))]
pub async fn invoke_stage(
    ctx: &PipelineContext,
    kind: PipelineStage,
    upload_ref: &UploadRef,
) -> Result<StageOutcome, StageError> {
    let owner_id = parse_uuid("owner_id", &upload_ref.owner_id)?;
    let upload_id = parse_uuid("upload_id", &upload_ref.upload_id)?;
    validate_key(&keys::upload(&owner_id, &upload_id)).map_err(RepoError::from)?;

    // The payload key is only known once the record is read; it is checked
    // before any object store call.
    let current = ctx.repo.load_upload(&owner_id, &upload_id).await?;
    validate_object_key(&current.object_key)?;

    if current.state.is_terminal() {
        debug!(state = %current.state, "Upload is terminal, skipping");
        return Ok(StageOutcome::Skipped);
    }
    if kind.flag().is_some_and(|flag| current.steps.is_done(flag)) {
        debug!("Stage already recorded, skipping");
        return Ok(StageOutcome::Skipped);
    }
    if current.state == PipelineState::Pending {
        return Err(StageError::Invalid(
            "upload has not been confirmed".to_string(),
        ));
    }
    if let Some(missing) = kind
        .prerequisites()
        .iter()
        .find(|step| !current.steps.is_done(**step))
    {
        return Err(StageError::Invalid(format!(
            "{} requires {} first",
            kind, missing
        )));
    }

    let done = tokio::time::timeout(
        ctx.config.stage_timeout(),
        stage_for(kind).run(ctx, current),
    )
    .await
    .map_err(|_| StageError::TimedOut(kind))??;

    let Versioned {
        value: mut upload,
        version,
    } = done;
    if let Some(flag) = kind.flag() {
        upload.steps.mark(flag);
    }
    upload.state = kind.reached_state();
    let saved = ctx.repo.save_upload(version, upload).await?;

    info!(state = %saved.state, "Stage recorded");
    Ok(StageOutcome::Completed)
}
