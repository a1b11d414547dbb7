use async_trait::async_trait;
use tracing::{info, instrument, warn};

use super::Stage;
use crate::{
    ingest::{PipelineContext, StageError},
    models::{IndexOutcome, Upload, Versioned},
    search::{IndexAck, IndexError, SearchDocument},
};

/// Pushes the track to the search collaborator.
///
/// Never fails on the indexer's account: every indexer result, including
/// an outage, is recorded as an outcome and the stage completes. A track
/// read that fails is recorded the same way. The call gets half the stage
/// budget so a hung indexer cannot time out the stage.
pub(super) struct IndexingStage;

#[async_trait]
impl Stage for IndexingStage {
    #[instrument(name = "indexing_stage", skip_all, fields(upload_id = %upload.id))]
    async fn run(
        &self,
        ctx: &PipelineContext,
        upload: Versioned<Upload>,
    ) -> Result<Versioned<Upload>, StageError> {
        let Versioned {
            value: mut upload,
            version,
        } = upload;
        let track_id = upload
            .track_id
            .ok_or_else(|| StageError::Invalid("track id missing".to_string()))?;

        let outcome = match ctx.repo.load_track(&upload.owner_id, &track_id).await {
            Err(e) => {
                warn!(error = %e, track_id = %track_id, "Could not read track for indexing");
                IndexOutcome::IndexFailed
            }
            Ok(None) => {
                warn!(track_id = %track_id, "Track missing, nothing to index");
                IndexOutcome::MissingTrack
            }
            Ok(Some(track)) => {
                let document = SearchDocument::from_track(&track);
                let budget = ctx.config.stage_timeout() / 2;
                match tokio::time::timeout(budget, ctx.indexer.index(&document)).await {
                    Ok(Ok(IndexAck::Accepted)) => IndexOutcome::Indexed,
                    Ok(Ok(IndexAck::Rejected(reason))) => {
                        warn!(reason = %reason, "Indexer rejected track");
                        IndexOutcome::IndexRejected
                    }
                    Ok(Err(IndexError::Disabled)) => IndexOutcome::SearchDisabled,
                    Ok(Err(e)) => {
                        warn!(error = %e, "Indexing failed");
                        IndexOutcome::IndexFailed
                    }
                    Err(_) => {
                        warn!(timeout = ?budget, "Indexer did not answer in time");
                        IndexOutcome::IndexFailed
                    }
                }
            }
        };

        info!(outcome = ?outcome, "Indexing recorded");
        upload.index_outcome = Some(outcome);
        Ok(Versioned::new(upload, version))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{
        ingest::{invoke_stage, metadata::wav_bytes, test_support::harness, PipelineStage, UploadRef},
        models::{Principal, Role},
        search::DisabledIndexer,
    };
    use std::sync::Arc;

    async fn run_to_indexing(h: &crate::ingest::test_support::Harness) -> Upload {
        let upload = h.confirmed_upload("idx.wav", wav_bytes(1)).await;
        let upload_ref = UploadRef::new(upload.owner_id, upload.id);
        for kind in &PipelineStage::ALL[..5] {
            invoke_stage(&h.ctx, *kind, &upload_ref).await.unwrap();
        }
        h.reload(&upload).await.value
    }

    #[tokio::test]
    async fn test_outage_is_recorded_not_raised() {
        let h = harness();
        h.indexer.set_available(false);
        let upload = run_to_indexing(&h).await;
        assert!(upload.steps.indexed);
        assert_eq!(upload.index_outcome, Some(IndexOutcome::IndexFailed));
    }

    #[tokio::test]
    async fn test_disabled_search() {
        let mut h = harness();
        h.ctx.indexer = Arc::new(DisabledIndexer);
        let upload = run_to_indexing(&h).await;
        assert_eq!(upload.index_outcome, Some(IndexOutcome::SearchDisabled));
    }

    #[tokio::test]
    async fn test_deleted_track_is_missing() {
        let h = harness();
        let upload = h.confirmed_upload("gone.wav", wav_bytes(1)).await;
        let upload_ref = UploadRef::new(upload.owner_id, upload.id);
        for kind in &PipelineStage::ALL[..4] {
            invoke_stage(&h.ctx, *kind, &upload_ref).await.unwrap();
        }
        let track_id = h.reload(&upload).await.track_id.unwrap();
        h.ctx
            .repo
            .delete_track(&Principal::new(upload.owner_id, Role::Subscriber), &upload.owner_id, &track_id)
            .await
            .unwrap();

        invoke_stage(&h.ctx, PipelineStage::Indexing, &upload_ref)
            .await
            .unwrap();
        let done = h.reload(&upload).await;
        assert_eq!(done.index_outcome, Some(IndexOutcome::MissingTrack));
        assert!(h.indexer.documents().await.is_empty());
    }
}
