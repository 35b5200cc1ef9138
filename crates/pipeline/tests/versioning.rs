//! Version management and merge edge cases, driven directly through the
//! step functions on seeded staging.

use chrono::{DateTime, TimeZone, Utc};
use scd_sync_pipeline::{apply_versions, merge_staging, version_staging, Step, SyncError};
use sync_core::{EntityConfig, RecordKey, StagingRecord, Value, VersionRecord};
use sync_storage::{MemoryStorage, Storage, StorageError};

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 2, hour, 0, 0).unwrap()
}

fn entity() -> EntityConfig {
    EntityConfig::new(
        "orders",
        "src_orders",
        "stg_orders",
        vec!["order_id".to_string(), "region".to_string()],
        vec!["status".to_string(), "note".to_string()],
    )
    .with_current_table("orders")
    .with_history_table("orders_history")
}

fn key(id: i64) -> RecordKey {
    RecordKey::new(vec![Value::Int(id), Value::text("eu")])
}

fn staged(id: i64, status: &str, note: Option<&str>, hour: u32) -> StagingRecord {
    StagingRecord {
        key: key(id),
        attributes: vec![Value::text(status), note.into()],
        created_at: at(0),
        modified_at: at(hour),
        valid_from: at(hour),
        valid_to: None,
    }
}

fn version(
    id: i64,
    status: &str,
    note: Option<&str>,
    from: u32,
    to: Option<u32>,
) -> VersionRecord {
    VersionRecord {
        key: key(id),
        attributes: vec![Value::text(status), note.into()],
        valid_from: at(from),
        valid_to: to.map(at),
    }
}

// ============================================================================
// apply_versions
// ============================================================================

#[tokio::test]
async fn test_apply_versions_is_idempotent() {
    let storage = MemoryStorage::new();
    let e = entity();
    storage
        .put_versions("orders_history", vec![version(1, "new", None, 1, None)])
        .await;
    let rows = vec![staged(1, "paid", None, 3), staged(2, "new", None, 3)];

    let mut tx = storage.begin().await.unwrap();
    let first = apply_versions(tx.as_mut(), &e, rows.clone()).await.unwrap();
    let second = apply_versions(tx.as_mut(), &e, rows).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!((first.inserted, first.closed), (2, 1));
    assert_eq!((second.inserted, second.closed, second.unchanged), (0, 0, 2));
    assert_eq!(
        storage.versions("orders_history").await,
        vec![
            version(1, "new", None, 1, Some(3)),
            version(1, "paid", None, 3, None),
            version(2, "new", None, 3, None),
        ]
    );
}

#[tokio::test]
async fn test_null_to_value_is_a_change() {
    let storage = MemoryStorage::new();
    let e = entity();
    storage
        .put_versions("orders_history", vec![version(1, "new", None, 1, None)])
        .await;
    storage
        .put_staging("stg_orders", vec![staged(1, "new", Some("gift"), 2)])
        .await;

    let report = version_staging(&storage, &e).await.unwrap();
    assert_eq!(report.closed, 1);
    assert_eq!(
        storage.versions("orders_history").await,
        vec![
            version(1, "new", None, 1, Some(2)),
            version(1, "new", Some("gift"), 2, None),
        ]
    );
}

#[tokio::test]
async fn test_duplicate_staging_keys_version_only_the_latest() {
    let storage = MemoryStorage::new();
    let e = entity();
    storage
        .put_staging(
            "stg_orders",
            vec![
                staged(1, "paid", None, 4),
                staged(1, "new", None, 2),
                staged(1, "shipped", None, 6),
            ],
        )
        .await;

    let report = version_staging(&storage, &e).await.unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(
        storage.versions("orders_history").await,
        vec![version(1, "shipped", None, 6, None)]
    );
}

#[tokio::test]
async fn test_conflicting_duplicates_fail_the_step() {
    let storage = MemoryStorage::new();
    let e = entity();
    storage
        .put_staging(
            "stg_orders",
            vec![staged(1, "paid", None, 4), staged(1, "void", None, 4)],
        )
        .await;

    let err = version_staging(&storage, &e).await.unwrap_err();
    assert_eq!(err.failed_step(), Some(Step::ApplyVersions));
    assert!(storage.versions("orders_history").await.is_empty());
}

#[tokio::test]
async fn test_stale_row_is_skipped() {
    let storage = MemoryStorage::new();
    let e = entity();
    let history = vec![
        version(1, "new", None, 1, Some(5)),
        version(1, "paid", None, 5, None),
    ];
    storage.put_versions("orders_history", history.clone()).await;
    storage
        .put_staging("stg_orders", vec![staged(1, "void", None, 3)])
        .await;

    let report = version_staging(&storage, &e).await.unwrap();
    assert_eq!(report.stale, 1);
    assert_eq!(report.written(), 0);
    assert_eq!(storage.versions("orders_history").await, history);
}

#[tokio::test]
async fn test_same_start_corrects_open_version() {
    let storage = MemoryStorage::new();
    let e = entity();
    storage
        .put_versions("orders_history", vec![version(1, "paid", None, 5, None)])
        .await;
    storage
        .put_staging("stg_orders", vec![staged(1, "paid", Some("late fix"), 5)])
        .await;

    let report = version_staging(&storage, &e).await.unwrap();
    assert_eq!(report.corrected, 1);
    assert_eq!(report.inserted, 0);
    assert_eq!(
        storage.versions("orders_history").await,
        vec![version(1, "paid", Some("late fix"), 5, None)]
    );
}

#[tokio::test]
async fn test_two_open_versions_fail_and_roll_back() {
    let storage = MemoryStorage::new();
    let e = entity();
    let history = vec![
        version(1, "new", None, 1, None),
        version(1, "paid", None, 2, None),
        version(2, "new", None, 1, None),
    ];
    storage.put_versions("orders_history", history.clone()).await;
    storage
        .put_staging(
            "stg_orders",
            vec![staged(2, "paid", None, 3), staged(1, "shipped", None, 3)],
        )
        .await;

    let err = version_staging(&storage, &e).await.unwrap_err();
    match err {
        SyncError::StepTransaction { step, source, .. } => {
            assert_eq!(step, Step::ApplyVersions);
            let cause = source.downcast_ref::<StorageError>().unwrap();
            assert!(matches!(cause, StorageError::Integrity(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(storage.versions("orders_history").await, history);
}

#[tokio::test]
async fn test_keys_only_in_target_are_left_alone() {
    let storage = MemoryStorage::new();
    let e = entity();
    storage
        .put_versions("orders_history", vec![version(9, "new", None, 1, None)])
        .await;
    storage
        .put_staging("stg_orders", vec![staged(1, "new", None, 2)])
        .await;

    version_staging(&storage, &e).await.unwrap();
    assert!(storage
        .versions("orders_history")
        .await
        .contains(&version(9, "new", None, 1, None)));
}

// ============================================================================
// merge
// ============================================================================

#[tokio::test]
async fn test_merge_upserts_and_skips_unchanged() {
    let storage = MemoryStorage::new();
    let e = entity();
    storage
        .put_staging(
            "stg_orders",
            vec![staged(1, "new", None, 1), staged(2, "new", None, 1)],
        )
        .await;
    let first = merge_staging(&storage, &e).await.unwrap();
    assert_eq!((first.inserted, first.updated, first.unchanged), (2, 0, 0));

    storage
        .put_staging(
            "stg_orders",
            vec![staged(1, "paid", None, 2), staged(2, "new", None, 2)],
        )
        .await;
    let second = merge_staging(&storage, &e).await.unwrap();
    assert_eq!((second.inserted, second.updated, second.unchanged), (0, 1, 1));

    let rows = storage.current_rows("orders").await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].key, key(1));
    assert_eq!(rows[0].attributes[0], Value::text("paid"));

    // Same staging again: nothing to write
    let third = merge_staging(&storage, &e).await.unwrap();
    assert_eq!(third.written(), 0);
}

#[tokio::test]
async fn test_merge_failure_rolls_back() {
    let storage = MemoryStorage::new();
    let e = entity();
    storage
        .put_staging("stg_orders", vec![staged(1, "new", None, 1)])
        .await;
    storage.fail_on("upsert_current");

    let err = merge_staging(&storage, &e).await.unwrap_err();
    assert_eq!(err.failed_step(), Some(Step::Merge));
    assert!(storage.current_rows("orders").await.is_empty());
}
