//! PostgreSQL item store tests
//!
//! These run only when `TEST_DATABASE_URL` points at a scratch database;
//! otherwise each test returns early. Every test works in its own partition
//! so runs do not interfere.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use muse_common::ErrorKind;
use muse_server::{
    config::{Config, TableBackend},
    models::{Principal, Role},
    repository::Repository,
    table::{Condition, Item, ItemKey, ItemStore, PgItemStore, StoreError, WriteOp},
};
use serde_json::json;
use serial_test::serial;
use std::sync::Arc;
use uuid::Uuid;

async fn store() -> Option<PgItemStore> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping Postgres test");
        return None;
    };
    let mut table = Config::default().table;
    table.backend = TableBackend::Postgres;
    table.database_url = Some(url);
    let store = PgItemStore::connect(&table)
        .await
        .expect("Failed to connect to TEST_DATABASE_URL");
    store.migrate().await.expect("Failed to run migrations");
    Some(store)
}

fn item(pk: &str, sk: &str, data: serde_json::Value) -> Item {
    Item {
        key: ItemKey::new(pk, sk),
        gsi1: None,
        gsi2: None,
        entity_type: "TEST".to_string(),
        data,
        version: 0,
    }
}

#[tokio::test]
#[serial]
async fn test_conditional_put_versions() {
    let Some(store) = store().await else { return };
    let pk = format!("TEST#{}", Uuid::new_v4());

    let v1 = store
        .put(item(&pk, "A", json!({"n": 1})), Condition::NotExists)
        .await
        .unwrap();
    assert_eq!(v1, 1);

    let err = store
        .put(item(&pk, "A", json!({"n": 2})), Condition::NotExists)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ConditionFailed { .. }));

    let v2 = store
        .put(item(&pk, "A", json!({"n": 2})), Condition::VersionEquals(1))
        .await
        .unwrap();
    assert_eq!(v2, 2);

    let stale = store
        .put(item(&pk, "A", json!({"n": 3})), Condition::VersionEquals(1))
        .await
        .unwrap_err();
    assert_eq!(muse_common::error::Classify::kind(&stale), ErrorKind::Conflict);

    let read = store.get(&ItemKey::new(&pk, "A")).await.unwrap();
    assert_eq!(read.data["n"], 2);
    assert_eq!(read.version, 2);
}

#[tokio::test]
#[serial]
async fn test_transaction_is_all_or_nothing() {
    let Some(store) = store().await else { return };
    let pk = format!("TEST#{}", Uuid::new_v4());
    store
        .put(item(&pk, "EXISTING", json!({})), Condition::NotExists)
        .await
        .unwrap();

    let err = store
        .transact(vec![
            WriteOp::put(item(&pk, "NEW", json!({})), Condition::NotExists),
            WriteOp::put(item(&pk, "EXISTING", json!({})), Condition::NotExists),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ConditionFailed { .. }));

    let missing = store.get(&ItemKey::new(&pk, "NEW")).await.unwrap_err();
    assert!(matches!(missing, StoreError::NotFound(_)));
}

#[tokio::test]
#[serial]
async fn test_owner_provisioning_over_postgres() {
    let Some(store) = store().await else { return };
    let repo = Repository::new(Arc::new(store));
    let principal = Principal::new(Uuid::new_v4(), Role::Subscriber);

    let (a, b) = tokio::join!(
        repo.get_or_create_owner(&principal, "pg@example.com", None),
        repo.get_or_create_owner(&principal, "pg@example.com", None),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.id, b.id);
    assert_eq!(a.version, b.version);
}
