use chrono::Utc;
use muse_common::Cursor;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{authorize, RepoResult, Repository};
use crate::{
    models::{album, keys, Album, Artist, Principal, Track, Versioned},
    retry::retry_with_backoff,
    table::{Condition, IndexName, Page, QueryRequest, SortRange},
};

impl Repository {
    /// Conditional create, falling back to a read when another writer got
    /// there first. Album ids are derived from `(name, artist)` so racing
    /// callers converge on one record.
    #[instrument(skip(self))]
    pub async fn get_or_create_album(
        &self,
        owner_id: &Uuid,
        name: &str,
        artist: &str,
        year: Option<u32>,
    ) -> RepoResult<Versioned<Album>> {
        let key = keys::album(owner_id, &album::album_id(name, artist));
        if let Some(existing) = self.load_opt::<Album>(&key).await? {
            return Ok(existing);
        }
        match self
            .save(Album::new(*owner_id, name, artist, year), Condition::NotExists)
            .await
        {
            Ok(created) => Ok(created),
            Err(e) if e.is_condition_failed() => {
                debug!("Album created concurrently");
                self.load(&key).await
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    pub async fn get_or_create_artist(
        &self,
        owner_id: &Uuid,
        name: &str,
    ) -> RepoResult<Versioned<Artist>> {
        let key = keys::artist(owner_id, &album::artist_id(name));
        if let Some(existing) = self.load_opt::<Artist>(&key).await? {
            return Ok(existing);
        }
        match self
            .save(Artist::new(*owner_id, name), Condition::NotExists)
            .await
        {
            Ok(created) => Ok(created),
            Err(e) if e.is_condition_failed() => {
                debug!("Artist created concurrently");
                self.load(&key).await
            }
            Err(e) => Err(e),
        }
    }

    /// Count `track` towards its album.
    ///
    /// An optimistic read-modify-write. The album inherits genre and cover
    /// art from the first track that has them.
    #[instrument(skip(self, track), fields(track_id = %track.id))]
    pub async fn add_track_to_album(
        &self,
        album_id: &str,
        track: &Track,
    ) -> RepoResult<Versioned<Album>> {
        let album_key = &keys::album(&track.owner_id, album_id);
        retry_with_backoff(self.retry, "album_counters", || async move {
            let current = self.load::<Album>(album_key).await?;
            let mut album = current.value;
            album.track_count = album.track_count.saturating_add(1);
            album.total_duration_secs = album
                .total_duration_secs
                .saturating_add(u64::from(track.duration_secs));
            if album.genre.is_none() {
                album.genre = track.genre.clone();
            }
            if album.cover_art_key.is_none() {
                album.cover_art_key = track.cover_art_key.clone();
            }
            album.updated_at = Utc::now();
            self.save(album, Condition::VersionEquals(current.version))
                .await
        })
        .await
    }

    /// Count `track` towards the artist it is credited to, whether or not
    /// it belongs to an album. A missing artist record is left alone.
    #[instrument(skip(self, track), fields(track_id = %track.id))]
    pub async fn add_track_to_artist(&self, track: &Track) -> RepoResult<()> {
        let artist_key = &keys::artist(&track.owner_id, &album::artist_id(track.credited_artist()));
        retry_with_backoff(self.retry, "artist_counters", || async move {
            let Some(current) = self.load_opt::<Artist>(artist_key).await? else {
                debug!("Artist record missing, not counted");
                return Ok(());
            };
            let mut artist = current.value;
            artist.track_count = artist.track_count.saturating_add(1);
            artist.updated_at = Utc::now();
            self.save(artist, Condition::VersionEquals(current.version))
                .await
                .map(|_| ())
        })
        .await
    }

    /// Albums by one artist, oldest release first.
    #[instrument(skip(self, cursor))]
    pub async fn list_albums_by_artist(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        artist: &str,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> RepoResult<Page<Album>> {
        authorize(principal, owner_id)?;
        self.query_records(
            QueryRequest::new(IndexName::Gsi1, keys::artist_partition(owner_id, artist))
                .sort(SortRange::BeginsWith(keys::ALBUM_PREFIX.to_string()))
                .cursor(cursor)
                .limit(limit),
        )
        .await
    }

    /// Artists ordered by name.
    #[instrument(skip(self, cursor))]
    pub async fn list_artists(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> RepoResult<Page<Artist>> {
        authorize(principal, owner_id)?;
        self.query_records(
            QueryRequest::new(IndexName::Gsi1, keys::artists_partition(owner_id))
                .cursor(cursor)
                .limit(limit),
        )
        .await
    }
}
