//! Single-table storage layer
//!
//! Every entity kind lives in one logical table addressed by `(pk, sk)`.
//! Two optional secondary indexes (`gsi1`, `gsi2`) provide alternate
//! access patterns; an item appears in an index only when it carries that
//! index's key attributes, which is how sparse indexes are modelled.
//!
//! Concurrency control is optimistic: the store stamps a `version` on every
//! write and callers guard their writes with a [`Condition`].
//!
//! # Backends
//!
//! - [`MemoryItemStore`]: `BTreeMap` behind an async `RwLock`
//! - [`PgItemStore`]: Postgres `items` table via sqlx

use async_trait::async_trait;
use muse_common::{error::Classify, ids::MAX_KEY_LEN, Cursor, ErrorKind};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt, sync::Arc};
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::MemoryItemStore;
pub use postgres::PgItemStore;

/// Hard cap on the number of writes in one [`ItemStore::transact`] call.
pub const MAX_TRANSACT_OPS: usize = 100;

/// Largest page a single query may request.
pub const MAX_QUERY_LIMIT: usize = 1000;

pub type StoreResult<T> = Result<T, StoreError>;

/// Shared handle used by every component that touches the table
pub type SharedStore = Arc<dyn ItemStore>;

// ============================================================================
// Keys and items
// ============================================================================

/// Primary key of an item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    pub pk: String,
    pub sk: String,
}

impl ItemKey {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.pk, self.sk)
    }
}

/// Key attributes of an item inside a secondary index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexKey {
    pub pk: String,
    pub sk: String,
}

impl IndexKey {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }
}

/// Raw item at the storage boundary.
///
/// Nothing above the repository layer sees this type; entities are decoded
/// into their own variants as soon as they leave the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub key: ItemKey,
    pub gsi1: Option<IndexKey>,
    pub gsi2: Option<IndexKey>,
    pub entity_type: String,
    pub data: serde_json::Value,
    /// Set by the store; ignored on input.
    pub version: u64,
}

impl Item {
    pub fn index_key(&self, index: IndexName) -> Option<IndexKey> {
        match index {
            IndexName::Primary => Some(IndexKey::new(&self.key.pk, &self.key.sk)),
            IndexName::Gsi1 => self.gsi1.clone(),
            IndexName::Gsi2 => self.gsi2.clone(),
        }
    }

    /// Position of this item within `index`, used for ordering and cursors.
    pub(crate) fn position(&self, index: IndexName) -> Option<Position> {
        self.index_key(index).map(|ik| Position {
            isk: ik.sk,
            pk: self.key.pk.clone(),
            sk: self.key.sk.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexName {
    Primary,
    Gsi1,
    Gsi2,
}

/// Sort position inside an index: `(index sort key, pk, sk)`.
///
/// This is also the payload of the opaque [`Cursor`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub(crate) struct Position {
    pub isk: String,
    pub pk: String,
    pub sk: String,
}

// ============================================================================
// Conditions and writes
// ============================================================================

/// Precondition attached to a write
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    None,
    NotExists,
    Exists,
    VersionEquals(u64),
    /// `path` is a JSON pointer into the item's `data`
    AttributeEquals {
        path: String,
        value: serde_json::Value,
    },
}

impl Condition {
    /// Check the condition against the current state of the target item.
    pub(crate) fn evaluate(&self, key: &ItemKey, current: Option<&Item>) -> StoreResult<()> {
        let failure = |reason: String| StoreError::ConditionFailed {
            key: key.clone(),
            reason,
        };

        match (self, current) {
            (Condition::None, _) => Ok(()),
            (Condition::NotExists, None) => Ok(()),
            (Condition::NotExists, Some(_)) => Err(failure("item already exists".to_string())),
            (Condition::Exists, Some(_)) => Ok(()),
            (Condition::Exists, None) => Err(failure("item does not exist".to_string())),
            (Condition::VersionEquals(expected), Some(item)) if item.version == *expected => Ok(()),
            (Condition::VersionEquals(expected), Some(item)) => Err(failure(format!(
                "expected version {}, found {}",
                expected, item.version
            ))),
            (Condition::VersionEquals(expected), None) => Err(failure(format!(
                "expected version {}, item does not exist",
                expected
            ))),
            (Condition::AttributeEquals { path, value }, Some(item)) => {
                match item.data.pointer(path) {
                    Some(actual) if actual == value => Ok(()),
                    Some(actual) => Err(failure(format!(
                        "attribute {} is {}, expected {}",
                        path, actual, value
                    ))),
                    None => Err(failure(format!("attribute {} is absent", path))),
                }
            }
            (Condition::AttributeEquals { path, .. }, None) => Err(failure(format!(
                "attribute {} checked on missing item",
                path
            ))),
        }
    }
}

/// One element of a transactional write
#[derive(Debug, Clone)]
pub enum WriteOp {
    Put { item: Item, condition: Condition },
    Delete { key: ItemKey, condition: Condition },
    /// Assert a condition without writing
    Check { key: ItemKey, condition: Condition },
}

impl WriteOp {
    pub fn put(item: Item, condition: Condition) -> Self {
        WriteOp::Put { item, condition }
    }

    pub fn delete(key: ItemKey, condition: Condition) -> Self {
        WriteOp::Delete { key, condition }
    }

    pub fn key(&self) -> &ItemKey {
        match self {
            WriteOp::Put { item, .. } => &item.key,
            WriteOp::Delete { key, .. } | WriteOp::Check { key, .. } => key,
        }
    }

    pub fn condition(&self) -> &Condition {
        match self {
            WriteOp::Put { condition, .. }
            | WriteOp::Delete { condition, .. }
            | WriteOp::Check { condition, .. } => condition,
        }
    }
}

// ============================================================================
// Queries
// ============================================================================

/// Range predicate on an index's sort key
#[derive(Debug, Clone, PartialEq)]
pub enum SortRange {
    All,
    BeginsWith(String),
    /// Inclusive on both ends
    Between(String, String),
    /// Inclusive lower bound
    From(String),
}

impl SortRange {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            SortRange::All => true,
            SortRange::BeginsWith(prefix) => value.starts_with(prefix.as_str()),
            SortRange::Between(low, high) => value >= low.as_str() && value <= high.as_str(),
            SortRange::From(low) => value >= low.as_str(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub index: IndexName,
    pub partition: String,
    pub sort: SortRange,
    pub cursor: Option<Cursor>,
    pub limit: usize,
    /// Ascending when true
    pub forward: bool,
}

impl QueryRequest {
    pub fn new(index: IndexName, partition: impl Into<String>) -> Self {
        Self {
            index,
            partition: partition.into(),
            sort: SortRange::All,
            cursor: None,
            limit: 50,
            forward: true,
        }
    }

    pub fn sort(mut self, sort: SortRange) -> Self {
        self.sort = sort;
        self
    }

    pub fn cursor(mut self, cursor: Option<Cursor>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn reverse(mut self) -> Self {
        self.forward = false;
        self
    }

    /// Validate and decode the cursor, if any.
    pub(crate) fn start_after(&self) -> StoreResult<Option<Position>> {
        if self.limit == 0 || self.limit > MAX_QUERY_LIMIT {
            return Err(StoreError::Invalid(format!(
                "limit must be between 1 and {}",
                MAX_QUERY_LIMIT
            )));
        }
        validate_key_attr("partition", &self.partition)?;
        match &self.cursor {
            Some(cursor) => cursor
                .decode::<Position>()
                .map(Some)
                .map_err(|e| StoreError::Invalid(e.to_string())),
            None => Ok(None),
        }
    }

    /// Whether `position` lies strictly beyond the cursor in scan order.
    pub(crate) fn is_after(&self, position: &Position, start: &Position) -> bool {
        let ordering = position.cmp(start);
        if self.forward {
            ordering == Ordering::Greater
        } else {
            ordering == Ordering::Less
        }
    }
}

/// One page of results.
///
/// `next_cursor` is `None` once the range is exhausted.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<Cursor>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }

    pub fn map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<Page<U>, E> {
        Ok(Page {
            items: self.items.into_iter().map(f).collect::<Result<_, _>>()?,
            next_cursor: self.next_cursor,
        })
    }
}

/// Cut a scan result fetched with `limit + 1` down to one page.
pub(crate) fn paginate(
    mut items: Vec<Item>,
    request: &QueryRequest,
) -> StoreResult<Page<Item>> {
    if items.len() <= request.limit {
        return Ok(Page {
            items,
            next_cursor: None,
        });
    }
    items.truncate(request.limit);
    let next_cursor = match items.last().and_then(|item| item.position(request.index)) {
        Some(position) => Some(
            Cursor::encode(&position).map_err(|e| StoreError::Backend(e.to_string()))?,
        ),
        None => None,
    };
    Ok(Page { items, next_cursor })
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Item not found: {0}")]
    NotFound(ItemKey),

    #[error("Condition failed on {key}: {reason}")]
    ConditionFailed { key: ItemKey, reason: String },

    #[error("Throttled: {0}")]
    Throttled(String),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl Classify for StoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::ConditionFailed { .. } => ErrorKind::Conflict,
            StoreError::Throttled(_) => ErrorKind::Transient,
            StoreError::Invalid(_) => ErrorKind::Validation,
            StoreError::Backend(_) => ErrorKind::Internal,
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

fn validate_key_attr(field: &str, value: &str) -> StoreResult<()> {
    if value.is_empty() {
        return Err(StoreError::Invalid(format!("{} must not be empty", field)));
    }
    if value.len() > MAX_KEY_LEN {
        return Err(StoreError::Invalid(format!(
            "{} exceeds {} bytes",
            field, MAX_KEY_LEN
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(StoreError::Invalid(format!(
            "{} contains control characters",
            field
        )));
    }
    Ok(())
}

pub(crate) fn validate_key(key: &ItemKey) -> StoreResult<()> {
    validate_key_attr("pk", &key.pk)?;
    validate_key_attr("sk", &key.sk)
}

pub(crate) fn validate_item(item: &Item) -> StoreResult<()> {
    validate_key(&item.key)?;
    if let Some(gsi1) = &item.gsi1 {
        validate_key_attr("gsi1pk", &gsi1.pk)?;
        validate_key_attr("gsi1sk", &gsi1.sk)?;
    }
    if let Some(gsi2) = &item.gsi2 {
        validate_key_attr("gsi2pk", &gsi2.pk)?;
        validate_key_attr("gsi2sk", &gsi2.sk)?;
    }
    if item.entity_type.is_empty() {
        return Err(StoreError::Invalid("entity_type must not be empty".to_string()));
    }
    Ok(())
}

pub(crate) fn validate_transaction(ops: &[WriteOp]) -> StoreResult<()> {
    if ops.is_empty() {
        return Err(StoreError::Invalid("transaction has no operations".to_string()));
    }
    if ops.len() > MAX_TRANSACT_OPS {
        return Err(StoreError::Invalid(format!(
            "transaction has {} operations, limit is {}",
            ops.len(),
            MAX_TRANSACT_OPS
        )));
    }
    let mut seen = std::collections::HashSet::with_capacity(ops.len());
    for op in ops {
        match op {
            WriteOp::Put { item, .. } => validate_item(item)?,
            WriteOp::Delete { key, .. } | WriteOp::Check { key, .. } => validate_key(key)?,
        }
        if !seen.insert(op.key()) {
            return Err(StoreError::Invalid(format!(
                "transaction touches {} more than once",
                op.key()
            )));
        }
    }
    Ok(())
}

// ============================================================================
// Store trait
// ============================================================================

/// The storage contract every component reads and writes through.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Point read; `NotFound` on miss.
    async fn get(&self, key: &ItemKey) -> StoreResult<Item>;

    /// Conditional write; returns the item's new version.
    async fn put(&self, item: Item, condition: Condition) -> StoreResult<u64>;

    /// Conditional delete. Deleting a missing item under `Condition::None`
    /// succeeds.
    async fn delete(&self, key: &ItemKey, condition: Condition) -> StoreResult<()>;

    /// Range read over the primary key or a secondary index.
    async fn query(&self, request: QueryRequest) -> StoreResult<Page<Item>>;

    /// All-or-nothing batch of conditioned writes.
    async fn transact(&self, ops: Vec<WriteOp>) -> StoreResult<()>;
}
