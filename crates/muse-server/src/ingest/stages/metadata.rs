use async_trait::async_trait;
use tracing::{info, instrument};

use super::Stage;
use crate::{
    ingest::{ExtractedAudio, PipelineContext, StageError},
    models::{Upload, Versioned},
};

/// Reads the staged payload and records its decoded tags.
pub(super) struct MetadataStage;

#[async_trait]
impl Stage for MetadataStage {
    #[instrument(name = "metadata_stage", skip_all, fields(upload_id = %upload.id))]
    async fn run(
        &self,
        ctx: &PipelineContext,
        upload: Versioned<Upload>,
    ) -> Result<Versioned<Upload>, StageError> {
        let Versioned {
            value: mut upload,
            version,
        } = upload;

        let bytes = ctx.objects.get_object(&upload.object_key).await?;
        upload.file_size = bytes.len() as u64;

        let extracted = extract(ctx, bytes, &upload.file_name).await?;
        info!(
            title = %extracted.metadata.title,
            format = ?extracted.metadata.format,
            "Metadata extracted"
        );
        upload.metadata = Some(extracted.metadata);

        Ok(Versioned::new(upload, version))
    }
}

/// Decode on the blocking pool.
pub(super) async fn extract(
    ctx: &PipelineContext,
    bytes: Vec<u8>,
    file_name: &str,
) -> Result<ExtractedAudio, StageError> {
    let extractor = ctx.extractor.clone();
    let file_name = file_name.to_string();
    tokio::task::spawn_blocking(move || extractor.extract(&bytes, &file_name))
        .await
        .map_err(|e| StageError::Internal(format!("extractor task failed: {}", e)))?
        .map_err(|e| StageError::CorruptPayload(e.to_string()))
}
