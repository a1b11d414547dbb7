use chrono::Utc;
use muse_common::{ids::validate_key_part, Cursor};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{authorize, RepoError, RepoResult, Repository};
use crate::{
    models::{
        self, keys,
        tag::{normalise_tag, MAX_TAG_LEN},
        Principal, Tag, Track, TrackTag, Versioned,
    },
    retry::retry_with_backoff,
    table::{
        Condition, IndexName, Page, QueryRequest, SortRange, StoreError, WriteOp, MAX_QUERY_LIMIT,
        MAX_TRANSACT_OPS,
    },
};

/// Upper bound on tags carried by one track. Attaching costs a check and a
/// row per tag plus the track write, all in one transaction.
pub const MAX_TAGS_PER_TRACK: usize = (MAX_TRANSACT_OPS - 1) / 2;

fn clean_tag(name: &str) -> RepoResult<String> {
    let name = normalise_tag(name);
    if name.is_empty() {
        return Err(RepoError::validation("tag name cannot be empty"));
    }
    if name.chars().count() > MAX_TAG_LEN {
        return Err(RepoError::validation(format!(
            "tag name too long (max {} chars)",
            MAX_TAG_LEN
        )));
    }
    validate_key_part("tag", &name)?;
    Ok(name)
}

fn clean_tags(names: &[String]) -> RepoResult<Vec<String>> {
    let mut cleaned = names
        .iter()
        .map(|n| clean_tag(n))
        .collect::<RepoResult<Vec<_>>>()?;
    cleaned.sort();
    cleaned.dedup();
    Ok(cleaned)
}

impl Repository {
    /// Idempotent: creating an existing tag returns the stored one.
    #[instrument(skip(self))]
    pub async fn create_tag(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        name: &str,
        color: Option<String>,
    ) -> RepoResult<Versioned<Tag>> {
        authorize(principal, owner_id)?;
        let name = clean_tag(name)?;
        self.ensure_tag(owner_id, &name, color).await
    }

    #[instrument(skip(self))]
    pub async fn list_tags(&self, principal: &Principal, owner_id: &Uuid) -> RepoResult<Vec<Tag>> {
        authorize(principal, owner_id)?;
        let mut tags = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .query_records::<Tag>(
                    QueryRequest::new(IndexName::Primary, keys::owner_partition(owner_id))
                        .sort(SortRange::BeginsWith(keys::TAG_PREFIX.to_string()))
                        .cursor(cursor)
                        .limit(MAX_QUERY_LIMIT),
                )
                .await?;
            tags.extend(page.items);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(tags),
            }
        }
    }

    /// Remove a tag and every membership row pointing at it.
    ///
    /// The definition goes first. Attaching checks the definition inside
    /// its transaction, so once it is gone no new membership can land and
    /// the cascade below sees every row written before. Each tagged track
    /// is detached in its own transaction so that `Track.tags` and the join
    /// rows never disagree. A call interrupted mid-cascade can be repeated.
    #[instrument(skip(self))]
    pub async fn delete_tag(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        name: &str,
    ) -> RepoResult<usize> {
        authorize(principal, owner_id)?;
        let name = clean_tag(name)?;
        let tag_key = keys::tag(owner_id, &name);
        let defined = self.load_opt::<Tag>(&tag_key).await?.is_some();
        if defined {
            self.store().delete(&tag_key, Condition::None).await?;
        }

        let mut detached = 0;
        loop {
            let page = self
                .query_records::<TrackTag>(
                    QueryRequest::new(IndexName::Gsi1, keys::tag_tracks_partition(owner_id, &name))
                        .limit(MAX_QUERY_LIMIT),
                )
                .await?;
            if page.items.is_empty() {
                break;
            }
            for membership in &page.items {
                self.detach_tag(owner_id, &membership.track_id, &name).await?;
                detached += 1;
            }
        }

        if !defined && detached == 0 {
            return Err(StoreError::NotFound(tag_key).into());
        }
        info!(tag = %name, detached, "Tag deleted");
        Ok(detached)
    }

    /// Attach tags to a track, creating tag definitions on demand.
    ///
    /// Fails with a conflict when a tag is deleted while being attached.
    #[instrument(skip(self))]
    pub async fn add_tags_to_track(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        track_id: &Uuid,
        names: &[String],
    ) -> RepoResult<Versioned<Track>> {
        authorize(principal, owner_id)?;
        let names = &clean_tags(names)?;
        if names.is_empty() {
            return Err(RepoError::validation("no tags given"));
        }
        for name in names {
            self.ensure_tag(owner_id, name, None).await?;
        }

        let track_key = &keys::track(owner_id, track_id);
        retry_with_backoff(self.retry, "add_tags_to_track", || async move {
            let current = self.load::<Track>(track_key).await?;
            let added: Vec<&String> = names
                .iter()
                .filter(|n| !current.tags.contains(*n))
                .collect();
            if added.is_empty() {
                return Ok(current);
            }
            if current.tags.len() + added.len() > MAX_TAGS_PER_TRACK {
                return Err(RepoError::validation(format!(
                    "a track carries at most {} tags",
                    MAX_TAGS_PER_TRACK
                )));
            }

            let now = Utc::now();
            let mut ops = Vec::with_capacity(2 * added.len() + 1);
            for name in &added {
                ops.push(WriteOp::Check {
                    key: keys::tag(owner_id, name),
                    condition: Condition::Exists,
                });
                let row = TrackTag {
                    owner_id: *owner_id,
                    track_id: *track_id,
                    tag_name: (*name).clone(),
                    added_at: now,
                };
                ops.push(WriteOp::put(models::encode(row)?, Condition::None));
            }

            let mut tags = current.tags.clone();
            tags.extend(added.into_iter().cloned());
            let track = Self::track_with_tags(current.value, &tags);
            ops.push(Self::track_write(track, current.version)?);
            self.store().transact(ops).await?;

            // Transactions do not report versions; re-read for the caller
            self.load::<Track>(track_key).await
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn remove_tag_from_track(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        track_id: &Uuid,
        name: &str,
    ) -> RepoResult<()> {
        authorize(principal, owner_id)?;
        let name = clean_tag(name)?;
        self.detach_tag(owner_id, track_id, &name).await
    }

    #[instrument(skip(self))]
    pub async fn get_track_tags(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        track_id: &Uuid,
    ) -> RepoResult<Vec<String>> {
        authorize(principal, owner_id)?;
        let rows = self.track_tag_rows(owner_id, track_id).await?;
        Ok(rows.into_iter().map(|r| r.tag_name).collect())
    }

    /// Tracks carrying `name`, in track id order.
    ///
    /// Memberships whose track has since been deleted are skipped, so a page
    /// can hold fewer items than `limit` while still having a next cursor.
    #[instrument(skip(self, cursor))]
    pub async fn list_tracks_by_tag(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        name: &str,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> RepoResult<Page<Track>> {
        authorize(principal, owner_id)?;
        let name = clean_tag(name)?;
        let memberships = self
            .query_records::<TrackTag>(
                QueryRequest::new(IndexName::Gsi1, keys::tag_tracks_partition(owner_id, &name))
                    .cursor(cursor)
                    .limit(limit),
            )
            .await?;

        let mut tracks = Vec::with_capacity(memberships.items.len());
        for membership in &memberships.items {
            match self
                .load_opt::<Track>(&keys::track(owner_id, &membership.track_id))
                .await?
            {
                Some(track) => tracks.push(track.value),
                None => debug!(track_id = %membership.track_id, "Skipping stale tag membership"),
            }
        }
        Ok(Page {
            items: tracks,
            next_cursor: memberships.next_cursor,
        })
    }

    async fn ensure_tag(
        &self,
        owner_id: &Uuid,
        name: &str,
        color: Option<String>,
    ) -> RepoResult<Versioned<Tag>> {
        let key = keys::tag(owner_id, name);
        if let Some(existing) = self.load_opt::<Tag>(&key).await? {
            return Ok(existing);
        }
        let tag = Tag {
            owner_id: *owner_id,
            name: name.to_string(),
            color,
            created_at: Utc::now(),
        };
        match self.save(tag, Condition::NotExists).await {
            Ok(created) => Ok(created),
            Err(e) if e.is_condition_failed() => self.load(&key).await,
            Err(e) => Err(e),
        }
    }

    /// Drop one membership row and the matching entry in `Track.tags`.
    async fn detach_tag(&self, owner_id: &Uuid, track_id: &Uuid, name: &str) -> RepoResult<()> {
        let track_key = &keys::track(owner_id, track_id);
        let row_key = &keys::track_tag(owner_id, track_id, name);
        retry_with_backoff(self.retry, "detach_tag", || async move {
            let mut ops = vec![WriteOp::delete(row_key.clone(), Condition::None)];
            if let Some(current) = self.load_opt::<Track>(track_key).await? {
                if current.tags.iter().any(|t| t == name) {
                    let tags: Vec<String> = current
                        .tags
                        .iter()
                        .filter(|t| t.as_str() != name)
                        .cloned()
                        .collect();
                    let track = Self::track_with_tags(current.value, &tags);
                    ops.push(Self::track_write(track, current.version)?);
                }
            }
            self.store().transact(ops).await?;
            Ok::<_, RepoError>(())
        })
        .await
    }
}
