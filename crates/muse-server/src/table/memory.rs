//! In-process table backend

use async_trait::async_trait;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use super::{
    paginate, validate_item, validate_key, validate_transaction, Condition, IndexName, Item,
    ItemKey, ItemStore, Page, QueryRequest, StoreError, StoreResult, WriteOp,
};

/// `BTreeMap`-backed store. Clones share the same table.
///
/// Transactions hold the write lock for their whole duration, so they are
/// trivially atomic and isolated.
#[derive(Clone, Default)]
pub struct MemoryItemStore {
    items: Arc<RwLock<BTreeMap<ItemKey, Item>>>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored items
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Number of items with a key in the given index partition
    pub async fn count_in_index(&self, index: IndexName, partition: &str) -> usize {
        self.items
            .read()
            .await
            .values()
            .filter(|item| {
                item.index_key(index)
                    .is_some_and(|ik| ik.pk == partition)
            })
            .count()
    }
}

fn apply_put(table: &mut BTreeMap<ItemKey, Item>, mut item: Item) -> u64 {
    let version = table
        .get(&item.key)
        .map(|existing| existing.version + 1)
        .unwrap_or(1);
    item.version = version;
    table.insert(item.key.clone(), item);
    version
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &ItemKey) -> StoreResult<Item> {
        validate_key(key)?;
        self.items
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    #[instrument(skip(self, item), fields(key = %item.key))]
    async fn put(&self, item: Item, condition: Condition) -> StoreResult<u64> {
        validate_item(&item)?;
        let mut table = self.items.write().await;
        condition.evaluate(&item.key, table.get(&item.key))?;
        let version = apply_put(&mut table, item);
        debug!(version, "item written");
        Ok(version)
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete(&self, key: &ItemKey, condition: Condition) -> StoreResult<()> {
        validate_key(key)?;
        let mut table = self.items.write().await;
        condition.evaluate(key, table.get(key))?;
        table.remove(key);
        Ok(())
    }

    #[instrument(skip(self, request), fields(index = ?request.index, partition = %request.partition))]
    async fn query(&self, request: QueryRequest) -> StoreResult<Page<Item>> {
        let start = request.start_after()?;
        let table = self.items.read().await;

        let mut matched: Vec<_> = table
            .values()
            .filter_map(|item| {
                let index_key = item.index_key(request.index)?;
                if index_key.pk != request.partition || !request.sort.matches(&index_key.sk) {
                    return None;
                }
                let position = item.position(request.index)?;
                match &start {
                    Some(start) if !request.is_after(&position, start) => None,
                    _ => Some((position, item)),
                }
            })
            .collect();

        matched.sort_by(|a, b| a.0.cmp(&b.0));
        if !request.forward {
            matched.reverse();
        }

        let items = matched
            .into_iter()
            .take(request.limit + 1)
            .map(|(_, item)| item.clone())
            .collect();
        paginate(items, &request)
    }

    #[instrument(skip(self, ops), fields(ops = ops.len()))]
    async fn transact(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        validate_transaction(&ops)?;
        let mut table = self.items.write().await;

        for op in &ops {
            op.condition().evaluate(op.key(), table.get(op.key()))?;
        }

        for op in ops {
            match op {
                WriteOp::Put { item, .. } => {
                    apply_put(&mut table, item);
                }
                WriteOp::Delete { key, .. } => {
                    table.remove(&key);
                }
                WriteOp::Check { .. } => {}
            }
        }
        Ok(())
    }
}
