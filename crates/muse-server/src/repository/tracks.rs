use chrono::Utc;
use muse_common::Cursor;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{authorize, RepoError, RepoResult, Repository};
use crate::{
    models::{
        self, album, keys, Album, Artist, Principal, Track, TrackPatch, TrackTag, Versioned,
        Visibility,
    },
    retry::retry_with_backoff,
    table::{Condition, IndexName, Page, QueryRequest, SortRange, StoreError, WriteOp},
};

impl Repository {
    /// Conditional create; fails with `ConditionFailed` if the id is taken.
    #[instrument(skip(self, track), fields(owner_id = %track.owner_id, track_id = %track.id))]
    pub async fn create_track(&self, track: Track) -> RepoResult<Versioned<Track>> {
        let created = self.save(track, Condition::NotExists).await?;
        info!("Track created");
        Ok(created)
    }

    /// Owners and privileged callers can read any of the owner's tracks;
    /// everyone else only public or unlisted ones.
    #[instrument(skip(self))]
    pub async fn get_track(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        track_id: &Uuid,
    ) -> RepoResult<Versioned<Track>> {
        let track = self.load::<Track>(&keys::track(owner_id, track_id)).await?;
        if !track.visibility.is_publicly_accessible() {
            authorize(principal, owner_id)?;
        }
        Ok(track)
    }

    #[instrument(skip(self, cursor))]
    pub async fn list_tracks(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> RepoResult<Page<Track>> {
        authorize(principal, owner_id)?;
        self.query_records(
            QueryRequest::new(IndexName::Primary, keys::owner_partition(owner_id))
                .sort(SortRange::BeginsWith(keys::TRACK_PREFIX.to_string()))
                .cursor(cursor)
                .limit(limit),
        )
        .await
    }

    #[instrument(skip(self, cursor))]
    pub async fn list_tracks_by_artist(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        artist: &str,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> RepoResult<Page<Track>> {
        authorize(principal, owner_id)?;
        self.query_records(
            QueryRequest::new(IndexName::Gsi1, keys::artist_partition(owner_id, artist))
                .sort(SortRange::BeginsWith(keys::TRACK_PREFIX.to_string()))
                .cursor(cursor)
                .limit(limit),
        )
        .await
    }

    /// Apply `patch` if the track is still at `expected_version`.
    ///
    /// A stale version is reported as `ConditionFailed`; the caller re-reads
    /// and decides whether to retry.
    #[instrument(skip(self, patch))]
    pub async fn update_track(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        track_id: &Uuid,
        expected_version: u64,
        patch: &TrackPatch,
    ) -> RepoResult<Versioned<Track>> {
        authorize(principal, owner_id)?;
        patch.validate().map_err(super::RepoError::Validation)?;

        let key = keys::track(owner_id, track_id);
        let current = self.load::<Track>(&key).await?;
        if current.version != expected_version {
            return Err(StoreError::ConditionFailed {
                key,
                reason: format!(
                    "expected version {}, found {}",
                    expected_version, current.version
                ),
            }
            .into());
        }

        let mut track = current.value;
        patch.apply(&mut track);
        self.save(track, Condition::VersionEquals(expected_version))
            .await
    }

    /// Flip visibility. The public index attributes are written or omitted
    /// in the same put as the visibility field.
    #[instrument(skip(self))]
    pub async fn set_visibility(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        track_id: &Uuid,
        visibility: Visibility,
    ) -> RepoResult<Versioned<Track>> {
        authorize(principal, owner_id)?;
        let key = &keys::track(owner_id, track_id);
        retry_with_backoff(self.retry, "set_visibility", || async move {
            let current = self.load::<Track>(key).await?;
            if current.visibility == visibility {
                return Ok(current);
            }
            let mut track = current.value;
            track.visibility = visibility;
            track.updated_at = Utc::now();
            self.save(track, Condition::VersionEquals(current.version))
                .await
        })
        .await
    }

    /// Newest public tracks first.
    #[instrument(skip(self, cursor))]
    pub async fn list_public_tracks(
        &self,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> RepoResult<Page<Track>> {
        self.query_records(
            QueryRequest::new(IndexName::Gsi2, keys::PUBLIC_TRACKS_PARTITION)
                .cursor(cursor)
                .limit(limit)
                .reverse(),
        )
        .await
    }

    /// Hard delete of the track and its tag memberships in one transaction.
    ///
    /// The same transaction takes the track off its album and artist
    /// counters, conditioned on the versions read, and the whole attempt is
    /// retried when any of them moved in the meantime. Returns the deleted
    /// record so callers can release its objects.
    #[instrument(skip(self))]
    pub async fn delete_track(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        track_id: &Uuid,
    ) -> RepoResult<Track> {
        authorize(principal, owner_id)?;
        let key = &keys::track(owner_id, track_id);
        let (track, tags) = retry_with_backoff(self.retry, "delete_track", || async move {
            let current = self.load::<Track>(key).await?;
            let memberships = self.track_tag_rows(owner_id, track_id).await?;

            let mut ops = Vec::with_capacity(memberships.len() + 3);
            ops.push(WriteOp::delete(key.clone(), Condition::VersionEquals(current.version)));
            for membership in &memberships {
                ops.push(WriteOp::delete(
                    keys::track_tag(owner_id, track_id, &membership.tag_name),
                    Condition::None,
                ));
            }
            ops.extend(self.aggregate_releases(&current).await?);
            self.store().transact(ops).await?;
            Ok::<_, RepoError>((current.value, memberships.len()))
        })
        .await?;

        if let Err(e) = self
            .record_storage(owner_id, -(track.file_size as i64), -1)
            .await
        {
            warn!(error = %e, "Failed to release storage for deleted track");
        }
        info!(tags, "Track deleted");
        Ok(track)
    }

    /// Counter writes that take `track` off its album and artist.
    ///
    /// Aggregates that were never created are skipped.
    async fn aggregate_releases(&self, track: &Track) -> RepoResult<Vec<WriteOp>> {
        let mut ops = Vec::with_capacity(2);
        if let Some(album_id) = track.album_id.as_deref() {
            if let Some(current) = self
                .load_opt::<Album>(&keys::album(&track.owner_id, album_id))
                .await?
            {
                let mut album = current.value;
                album.track_count = album.track_count.saturating_sub(1);
                album.total_duration_secs = album
                    .total_duration_secs
                    .saturating_sub(u64::from(track.duration_secs));
                album.updated_at = Utc::now();
                ops.push(WriteOp::put(
                    models::encode(album)?,
                    Condition::VersionEquals(current.version),
                ));
            }
        }

        let artist_key = keys::artist(&track.owner_id, &album::artist_id(track.credited_artist()));
        if let Some(current) = self.load_opt::<Artist>(&artist_key).await? {
            let mut artist = current.value;
            artist.track_count = artist.track_count.saturating_sub(1);
            artist.updated_at = Utc::now();
            ops.push(WriteOp::put(
                models::encode(artist)?,
                Condition::VersionEquals(current.version),
            ));
        }
        Ok(ops)
    }

    /// Unchecked read used by the pipeline. `None` when the track is gone.
    pub async fn load_track(
        &self,
        owner_id: &Uuid,
        track_id: &Uuid,
    ) -> RepoResult<Option<Versioned<Track>>> {
        self.load_opt(&keys::track(owner_id, track_id)).await
    }

    /// Point the track at its permanent object key.
    #[instrument(skip(self))]
    pub async fn set_track_object_key(
        &self,
        owner_id: &Uuid,
        track_id: &Uuid,
        object_key: &str,
    ) -> RepoResult<Versioned<Track>> {
        let key = &keys::track(owner_id, track_id);
        retry_with_backoff(self.retry, "set_track_object_key", || async move {
            let current = self.load::<Track>(key).await?;
            if current.object_key == object_key {
                return Ok(current);
            }
            let mut track = current.value;
            track.object_key = object_key.to_string();
            track.updated_at = Utc::now();
            self.save(track, Condition::VersionEquals(current.version))
                .await
        })
        .await
    }

    /// Every TrackTag row of one track.
    pub(crate) async fn track_tag_rows(
        &self,
        owner_id: &Uuid,
        track_id: &Uuid,
    ) -> RepoResult<Vec<TrackTag>> {
        let mut rows = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .query_records::<TrackTag>(
                    QueryRequest::new(
                        IndexName::Primary,
                        keys::track_tags_partition(owner_id, track_id),
                    )
                    .sort(SortRange::BeginsWith(keys::TAG_PREFIX.to_string()))
                    .cursor(cursor)
                    .limit(crate::table::MAX_QUERY_LIMIT),
                )
                .await?;
            rows.extend(page.items);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(rows),
            }
        }
    }

    /// Keep `Track.tags` in step with the join rows.
    pub(crate) fn track_with_tags(mut track: Track, tags: &[String]) -> Track {
        track.tags = tags.to_vec();
        track.tags.sort();
        track.tags.dedup();
        track.updated_at = Utc::now();
        track
    }

    /// Encode a track for use inside a transaction.
    pub(crate) fn track_write(track: Track, version: u64) -> RepoResult<WriteOp> {
        Ok(WriteOp::put(
            models::encode(track)?,
            Condition::VersionEquals(version),
        ))
    }
}
