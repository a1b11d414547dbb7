use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::Stage;
use crate::{
    ingest::{PipelineContext, StageError},
    models::{Upload, Versioned},
};

const DEFAULT_EXTENSION: &str = ".mp3";

/// `media/{owner}/{track}{ext}`, extension taken from the uploaded name.
pub(crate) fn media_key(owner_id: &Uuid, track_id: &Uuid, file_name: &str) -> String {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
    format!("media/{}/{}{}", owner_id, track_id, extension)
}

/// Moves the payload from staging to its permanent key.
///
/// Copy first, then delete. A re-run after the delete finds the
/// destination in place and the source gone, and only repoints the track.
pub(super) struct RelocationStage;

#[async_trait]
impl Stage for RelocationStage {
    #[instrument(name = "relocation_stage", skip_all, fields(upload_id = %upload.id))]
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

        let source = upload.object_key.clone();
        let dest = media_key(&upload.owner_id, &track_id, &upload.file_name);

        if source != dest {
            let already_moved = ctx.objects.head_object(&dest).await?.is_some()
                && ctx.objects.head_object(&source).await?.is_none();
            if already_moved {
                debug!(dest = %dest, "Payload already relocated");
            } else {
                ctx.objects.copy_object(&source, &dest).await?;
                if let Err(e) = ctx.objects.delete_object(&source).await {
                    warn!(error = %e, source = %source, "Failed to remove staged payload");
                }
                info!(source = %source, dest = %dest, "Payload relocated");
            }
        }

        match ctx
            .repo
            .set_track_object_key(&upload.owner_id, &track_id, &dest)
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                warn!(track_id = %track_id, "Track deleted during ingestion");
            }
            Err(e) => return Err(e.into()),
        }
        upload.object_key = dest;

        Ok(Versioned::new(upload, version))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{
        ingest::{invoke_stage, metadata::wav_bytes, test_support::harness, PipelineStage, UploadRef},
        objects::ObjectStore,
    };

    #[test]
    fn test_media_key_extension() {
        let owner = Uuid::nil();
        let track = Uuid::nil();
        assert!(media_key(&owner, &track, "Song.FLAC").ends_with(".flac"));
        assert!(media_key(&owner, &track, "noext").ends_with(".mp3"));
        assert!(media_key(&owner, &track, "a.b.ogg").starts_with("media/"));
    }

    #[tokio::test]
    async fn test_rerun_after_partial_move() {
        let h = harness();
        let upload = h.confirmed_upload("move.wav", wav_bytes(1)).await;
        let upload_ref = UploadRef::new(upload.owner_id, upload.id);
        for kind in &PipelineStage::ALL[..3] {
            invoke_stage(&h.ctx, *kind, &upload_ref).await.unwrap();
        }

        // Simulate a crash after copy and delete but before the flag write
        let recorded = h.reload(&upload).await;
        let dest = media_key(&upload.owner_id, &recorded.track_id.unwrap(), "move.wav");
        h.objects.copy_object(&recorded.object_key, &dest).await.unwrap();
        h.objects.delete_object(&recorded.object_key).await.unwrap();

        invoke_stage(&h.ctx, PipelineStage::Relocation, &upload_ref)
            .await
            .unwrap();

        let done = h.reload(&upload).await;
        assert_eq!(done.object_key, dest);
        assert!(done.steps.file_moved);
        assert_eq!(h.objects.keys().await, vec![dest.clone()]);

        let track = h
            .ctx
            .repo
            .load_track(&upload.owner_id, &done.track_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(track.object_key, dest);
    }
}
