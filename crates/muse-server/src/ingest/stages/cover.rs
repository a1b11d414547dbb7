use async_trait::async_trait;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{metadata::extract, Stage};
use crate::{
    ingest::{PipelineContext, StageError},
    models::{Upload, Versioned},
};

/// `covers/{owner}/{upload}{ext}`
pub(crate) fn cover_key(owner_id: &Uuid, upload_id: &Uuid, extension: &str) -> String {
    format!("covers/{}/{}{}", owner_id, upload_id, extension)
}

/// Stores embedded artwork next to the media. A payload without artwork
/// completes the stage with no key.
pub(super) struct CoverArtStage;

#[async_trait]
impl Stage for CoverArtStage {
    #[instrument(name = "cover_art_stage", skip_all, fields(upload_id = %upload.id))]
    async fn run(
        &self,
        ctx: &PipelineContext,
        upload: Versioned<Upload>,
    ) -> Result<Versioned<Upload>, StageError> {
        let Versioned {
            value: mut upload,
            version,
        } = upload;

        let has_cover = upload
            .metadata
            .as_ref()
            .ok_or_else(|| StageError::Invalid("metadata missing".to_string()))?
            .has_cover_art;
        if !has_cover {
            debug!("No embedded artwork");
            return Ok(Versioned::new(upload, version));
        }

        let bytes = ctx.objects.get_object(&upload.object_key).await?;
        let Some(cover) = extract(ctx, bytes, &upload.file_name).await?.cover else {
            debug!("Artwork flagged but not decodable");
            return Ok(Versioned::new(upload, version));
        };

        let key = cover_key(&upload.owner_id, &upload.id, cover.extension());
        let size = cover.data.len();
        ctx.objects
            .put_object(&key, cover.data, &cover.mime_type)
            .await?;
        info!(key = %key, size, "Cover art stored");
        upload.cover_art_key = Some(key);

        Ok(Versioned::new(upload, version))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{
        ingest::{
            invoke_stage,
            metadata::wav_bytes,
            test_support::{harness, CoverExtractor},
            PipelineStage, UploadRef,
        },
        objects::ObjectStore,
    };
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cover_written_under_owner() {
        let mut h = harness();
        h.ctx = h.ctx.with_extractor(Arc::new(CoverExtractor));
        let upload = h.confirmed_upload("cover.wav", wav_bytes(1)).await;
        let upload_ref = UploadRef::new(upload.owner_id, upload.id);

        invoke_stage(&h.ctx, PipelineStage::Metadata, &upload_ref).await.unwrap();
        invoke_stage(&h.ctx, PipelineStage::CoverArt, &upload_ref).await.unwrap();

        let done = h.reload(&upload).await;
        let key = done.cover_art_key.clone().unwrap();
        assert_eq!(key, cover_key(&upload.owner_id, &upload.id, ".png"));
        let meta = h.objects.head_object(&key).await.unwrap().unwrap();
        assert_eq!(meta.content_type.as_deref(), Some("image/png"));
        assert!(done.steps.cover_art_extracted);
    }

    #[tokio::test]
    async fn test_no_artwork_still_completes() {
        let h = harness();
        let upload = h.confirmed_upload("plain.wav", wav_bytes(1)).await;
        let upload_ref = UploadRef::new(upload.owner_id, upload.id);

        invoke_stage(&h.ctx, PipelineStage::Metadata, &upload_ref).await.unwrap();
        invoke_stage(&h.ctx, PipelineStage::CoverArt, &upload_ref).await.unwrap();

        let done = h.reload(&upload).await;
        assert!(done.cover_art_key.is_none());
        assert!(done.steps.cover_art_extracted);
        assert_eq!(h.objects.keys().await.len(), 1);
    }
}
