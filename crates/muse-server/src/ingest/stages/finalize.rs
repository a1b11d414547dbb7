use async_trait::async_trait;
use chrono::Utc;
use tracing::instrument;

use super::Stage;
use crate::{
    ingest::{PipelineContext, StageError},
    models::{Upload, Versioned},
};

/// Stamps completion. The terminal state itself is written by the caller.
pub(super) struct FinalizationStage;

#[async_trait]
impl Stage for FinalizationStage {
    #[instrument(name = "finalization_stage", skip_all, fields(upload_id = %upload.id))]
    async fn run(
        &self,
        _ctx: &PipelineContext,
        upload: Versioned<Upload>,
    ) -> Result<Versioned<Upload>, StageError> {
        let Versioned {
            value: mut upload,
            version,
        } = upload;
        upload.completed_at = Some(Utc::now());
        upload.error_reason = None;
        Ok(Versioned::new(upload, version))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ingest::{metadata::wav_bytes, test_support::harness};

    #[tokio::test]
    async fn test_stamps_completion_and_clears_reason() {
        let h = harness();
        let upload = h.confirmed_upload("end.wav", wav_bytes(1)).await;
        let Versioned { value: mut stale, version } = upload;
        stale.error_reason = Some("indexing: temporarily unavailable".to_string());

        let done = FinalizationStage
            .run(&h.ctx, Versioned::new(stale, version))
            .await
            .unwrap();
        assert_eq!(done.version, version);
        assert!(done.completed_at.is_some());
        assert!(done.error_reason.is_none());
    }
}
