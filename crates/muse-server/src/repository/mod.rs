//! Typed access patterns over the single table
//!
//! `Repository` is the only place entity variants are turned into raw items
//! and back. Each submodule adds the operations for one entity family.
//!
//! Authorization is role-shaped: an operation on an owner's entities is
//! allowed when the caller is that owner or holds a privileged role.

use muse_common::{error::Classify, ErrorKind, MuseError};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    models::{self, CodecError, Principal, Record, Versioned},
    retry::RetryPolicy,
    table::{Condition, ItemKey, ItemStore, Page, QueryRequest, SharedStore, StoreError},
};

pub mod albums;
pub mod owners;
pub mod playlists;
pub mod tags;
pub mod tracks;
pub mod uploads;

/// Default page size for list operations
pub const DEFAULT_PAGE_SIZE: usize = 50;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Error, Debug)]
pub enum RepoError {
    /// Passed through from the table unmodified
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl RepoError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RepoError::Store(StoreError::NotFound(_)))
    }

    pub fn is_condition_failed(&self) -> bool {
        matches!(self, RepoError::Store(StoreError::ConditionFailed { .. }))
    }
}

impl From<MuseError> for RepoError {
    fn from(err: MuseError) -> Self {
        RepoError::Validation(err.to_string())
    }
}

impl Classify for RepoError {
    fn kind(&self) -> ErrorKind {
        match self {
            RepoError::Store(e) => e.kind(),
            RepoError::Forbidden(_) => ErrorKind::Forbidden,
            RepoError::Validation(_) => ErrorKind::Validation,
            RepoError::Codec(_) => ErrorKind::Internal,
        }
    }
}

/// Fail with `Forbidden` unless `principal` may act for `owner_id`.
pub fn authorize(principal: &Principal, owner_id: &Uuid) -> RepoResult<()> {
    if principal.can_act_for(owner_id) {
        Ok(())
    } else {
        Err(RepoError::Forbidden(format!(
            "principal {} may not act for owner {}",
            principal.owner_id, owner_id
        )))
    }
}

/// Cheap to clone; all clones share the store.
#[derive(Clone)]
pub struct Repository {
    store: SharedStore,
    retry: RetryPolicy,
}

impl Repository {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the bounded retry used by optimistic read-modify-write loops.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<dyn ItemStore> {
        &self.store
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub(crate) async fn load<T: Record>(
        &self,
        key: &ItemKey,
    ) -> RepoResult<Versioned<T>> {
        let item = self.store.get(key).await?;
        Ok(models::decode(item)?)
    }

    /// Like [`Self::load`], mapping a miss to `None`.
    pub(crate) async fn load_opt<T: Record>(
        &self,
        key: &ItemKey,
    ) -> RepoResult<Option<Versioned<T>>> {
        match self.load(key).await {
            Ok(found) => Ok(Some(found)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub(crate) async fn save<T: Record>(
        &self,
        record: T,
        condition: Condition,
    ) -> RepoResult<Versioned<T>> {
        let item = models::encode(record.clone())?;
        let version = self.store.put(item, condition).await?;
        Ok(Versioned::new(record, version))
    }

    pub(crate) async fn query_records<T: Record>(
        &self,
        request: QueryRequest,
    ) -> RepoResult<Page<T>> {
        let page = self.store.query(request).await?;
        page.map(|item| models::decode::<T>(item).map(|v| v.value))
            .map_err(RepoError::from)
    }
}

/// Clamp a caller-supplied page size into the store's accepted range.
pub fn page_size(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, crate::table::MAX_QUERY_LIMIT)
}
