//! Postgres table backend
//!
//! Items live in the `items` table created by `migrations/0001_items.sql`.
//! Each write runs inside its own transaction: the target row is locked
//! with `SELECT ... FOR UPDATE`, the condition is evaluated against it, and
//! the row is inserted, updated or deleted. Inserts of previously absent
//! rows race on the primary key, so a unique violation is reported as a
//! failed condition.

use async_trait::async_trait;
use sqlx::{
    postgres::{PgPool, PgPoolOptions},
    PgConnection, Postgres, QueryBuilder,
};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::{
    paginate, validate_item, validate_key, validate_transaction, Condition, IndexKey, IndexName,
    Item, ItemKey, ItemStore, Page, QueryRequest, SortRange, StoreError, StoreResult, WriteOp,
};
use crate::config::TableConfig;

const SELECT_COLUMNS: &str =
    "SELECT pk, sk, gsi1pk, gsi1sk, gsi2pk, gsi2sk, entity_type, data, version FROM items";

#[derive(Debug, sqlx::FromRow)]
struct ItemRow {
    pk: String,
    sk: String,
    gsi1pk: Option<String>,
    gsi1sk: Option<String>,
    gsi2pk: Option<String>,
    gsi2sk: Option<String>,
    entity_type: String,
    data: serde_json::Value,
    version: i64,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        let index = |pk: Option<String>, sk: Option<String>| match (pk, sk) {
            (Some(pk), Some(sk)) => Some(IndexKey { pk, sk }),
            _ => None,
        };
        Item {
            key: ItemKey::new(row.pk, row.sk),
            gsi1: index(row.gsi1pk, row.gsi1sk),
            gsi2: index(row.gsi2pk, row.gsi2sk),
            entity_type: row.entity_type,
            data: row.data,
            version: u64::try_from(row.version).unwrap_or_default(),
        }
    }
}

/// Map driver errors onto the store taxonomy.
fn map_sqlx(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Throttled(err.to_string())
        }
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // serialization_failure, deadlock_detected, lock_not_available
            Some("40001") | Some("40P01") | Some("55P03") => {
                StoreError::Throttled(db.message().to_string())
            }
            _ => StoreError::Backend(db.message().to_string()),
        },
        _ => StoreError::Backend(err.to_string()),
    }
}

fn index_columns(index: IndexName) -> (&'static str, &'static str) {
    match index {
        IndexName::Primary => ("pk", "sk"),
        IndexName::Gsi1 => ("gsi1pk", "gsi1sk"),
        IndexName::Gsi2 => ("gsi2pk", "gsi2sk"),
    }
}

fn version_param(version: u64) -> StoreResult<i64> {
    i64::try_from(version).map_err(|_| StoreError::Invalid(format!("version {} overflows", version)))
}

#[derive(Clone)]
pub struct PgItemStore {
    pool: PgPool,
}

impl PgItemStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool using the table settings.
    pub async fn connect(config: &TableConfig) -> anyhow::Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required for the postgres backend"))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "Postgres item store connected"
        );
        Ok(Self::new(pool))
    }

    /// Apply pending migrations from the workspace `migrations/` directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_row(conn: &mut PgConnection, key: &ItemKey) -> StoreResult<Option<Item>> {
        let sql = format!("{} WHERE pk = $1 AND sk = $2 FOR UPDATE", SELECT_COLUMNS);
        let row: Option<ItemRow> = sqlx::query_as(&sql)
            .bind(&key.pk)
            .bind(&key.sk)
            .fetch_optional(&mut *conn)
            .await
            .map_err(map_sqlx)?;
        Ok(row.map(Item::from))
    }

    async fn write_row(
        conn: &mut PgConnection,
        item: &Item,
        current: Option<u64>,
    ) -> StoreResult<u64> {
        let (gsi1pk, gsi1sk) = match &item.gsi1 {
            Some(ik) => (Some(ik.pk.as_str()), Some(ik.sk.as_str())),
            None => (None, None),
        };
        let (gsi2pk, gsi2sk) = match &item.gsi2 {
            Some(ik) => (Some(ik.pk.as_str()), Some(ik.sk.as_str())),
            None => (None, None),
        };

        let version: i64 = match current {
            None => sqlx::query_scalar(
                "INSERT INTO items (pk, sk, gsi1pk, gsi1sk, gsi2pk, gsi2sk, entity_type, data, version) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1) \
                 RETURNING version",
            )
            .bind(&item.key.pk)
            .bind(&item.key.sk)
            .bind(gsi1pk)
            .bind(gsi1sk)
            .bind(gsi2pk)
            .bind(gsi2sk)
            .bind(&item.entity_type)
            .bind(&item.data)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    StoreError::ConditionFailed {
                        key: item.key.clone(),
                        reason: "item was created concurrently".to_string(),
                    }
                }
                _ => map_sqlx(e),
            })?,
            Some(previous) => sqlx::query_scalar(
                "UPDATE items SET gsi1pk = $3, gsi1sk = $4, gsi2pk = $5, gsi2sk = $6, \
                 entity_type = $7, data = $8, version = $9 + 1, updated_at = now() \
                 WHERE pk = $1 AND sk = $2 \
                 RETURNING version",
            )
            .bind(&item.key.pk)
            .bind(&item.key.sk)
            .bind(gsi1pk)
            .bind(gsi1sk)
            .bind(gsi2pk)
            .bind(gsi2sk)
            .bind(&item.entity_type)
            .bind(&item.data)
            .bind(version_param(previous)?)
            .fetch_one(&mut *conn)
            .await
            .map_err(map_sqlx)?,
        };

        Ok(u64::try_from(version).unwrap_or_default())
    }

    async fn delete_row(conn: &mut PgConnection, key: &ItemKey) -> StoreResult<()> {
        sqlx::query("DELETE FROM items WHERE pk = $1 AND sk = $2")
            .bind(&key.pk)
            .bind(&key.sk)
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    /// Lock, check, and apply one write on an open transaction.
    async fn apply(conn: &mut PgConnection, op: &WriteOp) -> StoreResult<Option<u64>> {
        let current = Self::lock_row(conn, op.key()).await?;
        op.condition().evaluate(op.key(), current.as_ref())?;

        match op {
            WriteOp::Put { item, .. } => {
                let version = Self::write_row(conn, item, current.map(|c| c.version)).await?;
                Ok(Some(version))
            }
            WriteOp::Delete { key, .. } => {
                if current.is_some() {
                    Self::delete_row(conn, key).await?;
                }
                Ok(None)
            }
            WriteOp::Check { .. } => Ok(None),
        }
    }

    /// Run a batch of writes in one database transaction.
    async fn run(&self, ops: &[WriteOp]) -> StoreResult<Option<u64>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let mut last = None;
        for op in ops {
            // Dropping `tx` on error rolls back
            last = Self::apply(&mut tx, op).await?;
        }
        tx.commit().await.map_err(map_sqlx)?;
        Ok(last)
    }
}

#[async_trait]
impl ItemStore for PgItemStore {
    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &ItemKey) -> StoreResult<Item> {
        validate_key(key)?;
        let sql = format!("{} WHERE pk = $1 AND sk = $2", SELECT_COLUMNS);
        let row: Option<ItemRow> = sqlx::query_as(&sql)
            .bind(&key.pk)
            .bind(&key.sk)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(Item::from)
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    #[instrument(skip(self, item), fields(key = %item.key))]
    async fn put(&self, item: Item, condition: Condition) -> StoreResult<u64> {
        validate_item(&item)?;
        let op = WriteOp::put(item, condition);
        let version = self.run(std::slice::from_ref(&op)).await?;
        version.ok_or_else(|| StoreError::Backend("put returned no version".to_string()))
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete(&self, key: &ItemKey, condition: Condition) -> StoreResult<()> {
        validate_key(key)?;
        self.run(&[WriteOp::delete(key.clone(), condition)]).await?;
        Ok(())
    }

    #[instrument(skip(self, request), fields(index = ?request.index, partition = %request.partition))]
    async fn query(&self, request: QueryRequest) -> StoreResult<Page<Item>> {
        let start = request.start_after()?;
        let (pcol, scol) = index_columns(request.index);
        let direction = if request.forward { "ASC" } else { "DESC" };

        let mut qb = QueryBuilder::<Postgres>::new(SELECT_COLUMNS);
        qb.push(" WHERE ")
            .push(pcol)
            .push(" = ")
            .push_bind(request.partition.clone());

        match &request.sort {
            SortRange::All => {}
            SortRange::BeginsWith(prefix) => {
                qb.push(" AND starts_with(")
                    .push(scol)
                    .push(", ")
                    .push_bind(prefix.clone())
                    .push(")");
            }
            SortRange::Between(low, high) => {
                qb.push(" AND ")
                    .push(scol)
                    .push(" BETWEEN ")
                    .push_bind(low.clone())
                    .push(" AND ")
                    .push_bind(high.clone());
            }
            SortRange::From(low) => {
                qb.push(" AND ").push(scol).push(" >= ").push_bind(low.clone());
            }
        }

        if let Some(start) = start {
            let comparison = if request.forward { " > " } else { " < " };
            qb.push(" AND (")
                .push(scol)
                .push(", pk, sk)")
                .push(comparison)
                .push("(")
                .push_bind(start.isk)
                .push(", ")
                .push_bind(start.pk)
                .push(", ")
                .push_bind(start.sk)
                .push(")");
        }

        qb.push(format!(
            " ORDER BY {scol} {direction}, pk {direction}, sk {direction} LIMIT "
        ))
        .push_bind((request.limit + 1) as i64);

        let rows: Vec<ItemRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        debug!(rows = rows.len(), "query returned");

        paginate(rows.into_iter().map(Item::from).collect(), &request)
    }

    #[instrument(skip(self, ops), fields(ops = ops.len()))]
    async fn transact(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        validate_transaction(&ops)?;
        match self.run(&ops).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(error = %e, "transaction aborted");
                Err(e)
            }
        }
    }
}
