//! Playlists and their ordered entries
//!
//! Every mutation of the entry set commits the entry writes and the
//! playlist counters in one transaction, guarded on the playlist version.

use chrono::Utc;
use muse_common::Cursor;
use std::collections::HashSet;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{authorize, RepoError, RepoResult, Repository};
use crate::{
    models::{self, keys, Playlist, PlaylistEntry, Principal, Track, Versioned},
    retry::retry_with_backoff,
    table::{
        Condition, IndexName, Page, QueryRequest, SortRange, WriteOp, MAX_QUERY_LIMIT,
        MAX_TRANSACT_OPS,
    },
};

/// One transaction must cover every entry plus the playlist itself.
pub const MAX_PLAYLIST_ENTRIES: usize = MAX_TRANSACT_OPS - 1;

const MAX_NAME_LEN: usize = 200;

/// Writes that turn `old` into `new`, position by position.
///
/// Positions present in both are overwritten only when their content
/// changed; positions past the end of `new` are deleted.
fn rewrite_ops(
    owner_id: &Uuid,
    playlist_id: &Uuid,
    old: &[PlaylistEntry],
    new: &[PlaylistEntry],
) -> RepoResult<Vec<WriteOp>> {
    let mut ops = Vec::new();
    for (position, entry) in new.iter().enumerate() {
        if old.get(position) != Some(entry) {
            ops.push(WriteOp::put(models::encode(entry.clone())?, Condition::None));
        }
    }
    for entry in old.iter().skip(new.len()) {
        ops.push(WriteOp::delete(
            keys::playlist_entry(owner_id, playlist_id, entry.position),
            Condition::None,
        ));
    }
    Ok(ops)
}

/// Renumber entries into contiguous positions starting at 0.
fn renumber(entries: impl IntoIterator<Item = PlaylistEntry>) -> Vec<PlaylistEntry> {
    entries
        .into_iter()
        .enumerate()
        .map(|(position, mut entry)| {
            entry.position = position as u32;
            entry
        })
        .collect()
}

/// Apply a caller ordering to `current`.
///
/// Unknown ids are skipped. A track listed twice claims its entries in
/// playlist order. Entries the ordering does not mention keep their
/// relative order after the ordered ones.
fn reordered(current: &[PlaylistEntry], ordering: &[Uuid]) -> Vec<PlaylistEntry> {
    let mut remaining: Vec<Option<&PlaylistEntry>> = current.iter().map(Some).collect();
    let mut result = Vec::with_capacity(current.len());
    for track_id in ordering {
        if let Some(slot) = remaining
            .iter_mut()
            .find(|slot| matches!(slot, Some(e) if e.track_id == *track_id))
        {
            if let Some(entry) = slot.take() {
                result.push(entry.clone());
            }
        }
    }
    result.extend(remaining.into_iter().flatten().cloned());
    renumber(result)
}

impl Repository {
    #[instrument(skip(self, description))]
    pub async fn create_playlist(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        name: &str,
        description: Option<String>,
    ) -> RepoResult<Versioned<Playlist>> {
        authorize(principal, owner_id)?;
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(RepoError::validation("playlist name cannot be empty"));
        }
        if trimmed.chars().count() > MAX_NAME_LEN {
            return Err(RepoError::validation(format!(
                "playlist name too long (max {} chars)",
                MAX_NAME_LEN
            )));
        }
        let created = self
            .save(Playlist::new(*owner_id, trimmed, description), Condition::NotExists)
            .await?;
        info!(playlist_id = %created.id, "Playlist created");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn get_playlist(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        playlist_id: &Uuid,
    ) -> RepoResult<Versioned<Playlist>> {
        authorize(principal, owner_id)?;
        self.load(&keys::playlist(owner_id, playlist_id)).await
    }

    #[instrument(skip(self, cursor))]
    pub async fn list_playlists(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> RepoResult<Page<Playlist>> {
        authorize(principal, owner_id)?;
        self.query_records(
            QueryRequest::new(IndexName::Primary, keys::owner_partition(owner_id))
                .sort(SortRange::BeginsWith(keys::PLAYLIST_PREFIX.to_string()))
                .cursor(cursor)
                .limit(limit),
        )
        .await
    }

    /// Entries in position order.
    #[instrument(skip(self))]
    pub async fn list_entries(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        playlist_id: &Uuid,
    ) -> RepoResult<Vec<PlaylistEntry>> {
        authorize(principal, owner_id)?;
        self.entry_rows(owner_id, playlist_id).await
    }

    /// Append tracks at the next free positions.
    #[instrument(skip(self, track_ids), fields(count = track_ids.len()))]
    pub async fn add_tracks(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        playlist_id: &Uuid,
        track_ids: &[Uuid],
    ) -> RepoResult<Versioned<Playlist>> {
        authorize(principal, owner_id)?;
        if track_ids.is_empty() {
            return Err(RepoError::validation("no tracks given"));
        }

        let mut snapshot = Vec::with_capacity(track_ids.len());
        for track_id in track_ids {
            let track = self.load::<Track>(&keys::track(owner_id, track_id)).await?;
            snapshot.push((track.id, track.duration_secs));
        }
        let snapshot = &snapshot;

        let playlist_key = &keys::playlist(owner_id, playlist_id);
        retry_with_backoff(self.retry, "add_tracks", || async move {
            let current = self.load::<Playlist>(playlist_key).await?;
            let entries = self.entry_rows(owner_id, playlist_id).await?;
            if entries.len() + snapshot.len() > MAX_PLAYLIST_ENTRIES {
                return Err(RepoError::validation(format!(
                    "a playlist holds at most {} tracks",
                    MAX_PLAYLIST_ENTRIES
                )));
            }

            let now = Utc::now();
            let mut playlist = current.value;
            let mut ops = Vec::with_capacity(snapshot.len() + 1);
            for (offset, (track_id, duration_secs)) in snapshot.iter().enumerate() {
                let entry = PlaylistEntry {
                    owner_id: *owner_id,
                    playlist_id: *playlist_id,
                    position: (entries.len() + offset) as u32,
                    track_id: *track_id,
                    duration_secs: *duration_secs,
                    added_at: now,
                };
                ops.push(WriteOp::put(models::encode(entry)?, Condition::NotExists));
                playlist.total_duration_secs += u64::from(*duration_secs);
            }
            playlist.track_count = (entries.len() + snapshot.len()) as u32;
            playlist.updated_at = now;
            ops.push(WriteOp::put(
                models::encode(playlist)?,
                Condition::VersionEquals(current.version),
            ));

            self.store().transact(ops).await?;
            self.load::<Playlist>(playlist_key).await
        })
        .await
    }

    /// Remove every entry for the given tracks and close the gaps.
    #[instrument(skip(self, track_ids), fields(count = track_ids.len()))]
    pub async fn remove_tracks(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        playlist_id: &Uuid,
        track_ids: &[Uuid],
    ) -> RepoResult<Versioned<Playlist>> {
        authorize(principal, owner_id)?;
        let removing: &HashSet<Uuid> = &track_ids.iter().copied().collect();

        let playlist_key = &keys::playlist(owner_id, playlist_id);
        retry_with_backoff(self.retry, "remove_tracks", || async move {
            let current = self.load::<Playlist>(playlist_key).await?;
            let entries = self.entry_rows(owner_id, playlist_id).await?;

            let (removed, kept): (Vec<_>, Vec<_>) = entries
                .iter()
                .cloned()
                .partition(|e| removing.contains(&e.track_id));
            if removed.is_empty() {
                return Ok(current);
            }

            let kept = renumber(kept);
            let mut ops = rewrite_ops(owner_id, playlist_id, &entries, &kept)?;

            let mut playlist = current.value;
            let released: u64 = removed.iter().map(|e| u64::from(e.duration_secs)).sum();
            playlist.total_duration_secs = playlist.total_duration_secs.saturating_sub(released);
            playlist.track_count = kept.len() as u32;
            playlist.updated_at = Utc::now();
            ops.push(WriteOp::put(
                models::encode(playlist)?,
                Condition::VersionEquals(current.version),
            ));

            self.store().transact(ops).await?;
            self.load::<Playlist>(playlist_key).await
        })
        .await
    }

    /// Rewrite the entry set in the caller's order.
    ///
    /// Every entry keeps its original `added_at`. Ids not in the playlist
    /// are skipped and entries left out of `ordering` are appended, so a
    /// reorder never changes the entry count.
    #[instrument(skip(self, ordering), fields(count = ordering.len()))]
    pub async fn reorder(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        playlist_id: &Uuid,
        ordering: &[Uuid],
    ) -> RepoResult<Versioned<Playlist>> {
        authorize(principal, owner_id)?;

        let playlist_key = &keys::playlist(owner_id, playlist_id);
        retry_with_backoff(self.retry, "reorder", || async move {
            let current = self.load::<Playlist>(playlist_key).await?;
            let entries = self.entry_rows(owner_id, playlist_id).await?;
            let next = reordered(&entries, ordering);

            let mut ops = rewrite_ops(owner_id, playlist_id, &entries, &next)?;
            if ops.is_empty() {
                return Ok(current);
            }
            let mut playlist = current.value;
            playlist.track_count = next.len() as u32;
            playlist.updated_at = Utc::now();
            ops.push(WriteOp::put(
                models::encode(playlist)?,
                Condition::VersionEquals(current.version),
            ));

            self.store().transact(ops).await?;
            self.load::<Playlist>(playlist_key).await
        })
        .await
    }

    /// Delete the playlist together with all of its entries.
    #[instrument(skip(self))]
    pub async fn delete_playlist(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        playlist_id: &Uuid,
    ) -> RepoResult<()> {
        authorize(principal, owner_id)?;

        let playlist_key = &keys::playlist(owner_id, playlist_id);
        retry_with_backoff(self.retry, "delete_playlist", || async move {
            let current = self.load::<Playlist>(playlist_key).await?;
            let entries = self.entry_rows(owner_id, playlist_id).await?;

            let mut ops: Vec<WriteOp> = entries
                .iter()
                .map(|e| {
                    WriteOp::delete(
                        keys::playlist_entry(owner_id, playlist_id, e.position),
                        Condition::None,
                    )
                })
                .collect();
            ops.push(WriteOp::delete(
                playlist_key.clone(),
                Condition::VersionEquals(current.version),
            ));
            self.store().transact(ops).await?;
            info!(entries = entries.len(), "Playlist deleted");
            Ok::<_, RepoError>(())
        })
        .await
    }

    pub(crate) async fn entry_rows(
        &self,
        owner_id: &Uuid,
        playlist_id: &Uuid,
    ) -> RepoResult<Vec<PlaylistEntry>> {
        let mut rows = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .query_records::<PlaylistEntry>(
                    QueryRequest::new(
                        IndexName::Primary,
                        keys::playlist_entries_partition(owner_id, playlist_id),
                    )
                    .sort(SortRange::BeginsWith(keys::POSITION_PREFIX.to_string()))
                    .cursor(cursor)
                    .limit(MAX_QUERY_LIMIT),
                )
                .await?;
            rows.extend(page.items);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(rows),
            }
        }
    }
}
