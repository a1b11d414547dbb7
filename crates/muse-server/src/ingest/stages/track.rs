use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::Stage;
use crate::{
    ingest::{PipelineContext, StageError},
    models::{album, AudioMetadata, Track, Upload, Versioned, Visibility},
};

/// Creates the track record, then counts it towards its aggregates.
///
/// The track id is persisted on the upload before the track is written, so
/// a re-run after a crash targets the same key and the conditional create
/// turns into a no-op.
pub(super) struct TrackRecordStage;

fn build_track(upload: &Upload, track_id: Uuid, metadata: &AudioMetadata) -> Track {
    let album_artist = metadata
        .album_artist
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(&metadata.artist);
    let now = Utc::now();
    Track {
        id: track_id,
        owner_id: upload.owner_id,
        title: metadata.title.clone(),
        artist: metadata.artist.clone(),
        album: metadata.album.clone(),
        album_id: metadata
            .album
            .as_deref()
            .map(|name| album::album_id(name, album_artist)),
        album_artist: metadata.album_artist.clone(),
        genre: metadata.genre.clone(),
        year: metadata.year,
        track_number: metadata.track_number,
        disc_number: metadata.disc_number,
        duration_secs: metadata.duration_secs,
        format: metadata.format,
        bitrate: metadata.bitrate,
        sample_rate: metadata.sample_rate,
        channels: metadata.channels,
        file_size: upload.file_size,
        file_name: upload.file_name.clone(),
        object_key: upload.object_key.clone(),
        cover_art_key: upload.cover_art_key.clone(),
        bpm: None,
        musical_key: None,
        visibility: Visibility::Private,
        tags: vec![],
        upload_id: Some(upload.id),
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl Stage for TrackRecordStage {
    #[instrument(name = "track_stage", skip_all, fields(upload_id = %upload.id))]
    async fn run(
        &self,
        ctx: &PipelineContext,
        upload: Versioned<Upload>,
    ) -> Result<Versioned<Upload>, StageError> {
        let metadata = upload
            .metadata
            .clone()
            .ok_or_else(|| StageError::Invalid("metadata missing".to_string()))?;

        let upload = match upload.track_id {
            Some(_) => upload,
            None => {
                let Versioned {
                    value: mut pending,
                    version,
                } = upload;
                pending.track_id = Some(Uuid::new_v4());
                ctx.repo.save_upload(version, pending).await?
            }
        };
        let track_id = upload
            .track_id
            .ok_or_else(|| StageError::Internal("track id not assigned".to_string()))?;

        let track = build_track(&upload, track_id, &metadata);
        match ctx.repo.create_track(track).await {
            Ok(created) => {
                info!(track_id = %track_id, "Track created");
                update_aggregates(ctx, &created).await;
            }
            Err(e) if e.is_condition_failed() => {
                debug!(track_id = %track_id, "Track already exists");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(upload)
    }
}

/// Album, artist and storage counters. Failures are logged; the track
/// itself is already durable.
async fn update_aggregates(ctx: &PipelineContext, track: &Track) {
    let owner_id = &track.owner_id;
    let artist_name = track.credited_artist();

    let artist_counted = async {
        ctx.repo.get_or_create_artist(owner_id, artist_name).await?;
        ctx.repo.add_track_to_artist(track).await
    };
    if let Err(e) = artist_counted.await {
        warn!(error = %e, "Failed to update artist counters");
    }

    if let Some(album_name) = track.album.as_deref() {
        let counted = async {
            let album = ctx
                .repo
                .get_or_create_album(owner_id, album_name, artist_name, track.year)
                .await?;
            ctx.repo.add_track_to_album(&album.id, track).await
        };
        if let Err(e) = counted.await {
            warn!(error = %e, album = album_name, "Failed to update album counters");
        }
    }

    let bytes = i64::try_from(track.file_size).unwrap_or(i64::MAX);
    if let Err(e) = ctx.repo.record_storage(owner_id, bytes, 1).await {
        warn!(error = %e, "Failed to record storage usage");
    }
}
