//! Integration tests against a live PostgreSQL server.
//!
//! Set `SCD_SYNC_TEST_POSTGRES_URL` (e.g.
//! `host=localhost port=15432 user=postgres password=postgres`) to run
//! them; without it every test returns early.

use checkpoint::{Watermark, WatermarkStore};
use chrono::{DateTime, TimeZone, Utc};
use scd_sync_postgresql::{new_postgresql_client, PostgresStorage, WatermarkTable};
use std::sync::Arc;
use sync_core::{CurrentRecord, EntityConfig, RecordKey, StagingRecord, Value, VersionRecord};
use sync_storage::{SourceFilter, Storage, StorageError};
use tokio::sync::Mutex;
use tokio_postgres::Client;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const URL_VAR: &str = "SCD_SYNC_TEST_POSTGRES_URL";

fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

fn ts(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 2, hour, 0, 0).unwrap()
}

/// Create a fresh set of tables and return the raw client, the storage and
/// the entity config.
async fn setup(suffix: &str) -> Option<(Arc<Mutex<Client>>, PostgresStorage, EntityConfig)> {
    let url = match std::env::var(URL_VAR) {
        Ok(url) => url,
        Err(_) => {
            eprintln!("{URL_VAR} not set, skipping");
            return None;
        }
    };
    init_logging();

    let run = Utc::now().timestamp_micros();
    let name = |t: &str| format!("scd_{t}_{suffix}_{run}");
    let client = new_postgresql_client(&url).await.unwrap();
    let ddl = format!(
        r#"
        CREATE TABLE "{src}" (id BIGINT, name TEXT, created_date TIMESTAMPTZ, modified_date TIMESTAMPTZ);
        CREATE TABLE "{stg}" (id BIGINT, name TEXT, created_date TIMESTAMPTZ, modified_date TIMESTAMPTZ,
                              start_date TIMESTAMPTZ, end_date TIMESTAMPTZ);
        CREATE TABLE "{cur}" (id BIGINT PRIMARY KEY, name TEXT);
        CREATE TABLE "{hist}" (id BIGINT, name TEXT, start_date TIMESTAMP, end_date TIMESTAMP);
        CREATE TABLE "{wm}" (table_name TEXT PRIMARY KEY, max_created_date TIMESTAMPTZ,
                             max_modified_date TIMESTAMPTZ);
        "#,
        src = name("src"),
        stg = name("stg"),
        cur = name("cur"),
        hist = name("hist"),
        wm = name("wm"),
    );
    client.lock().await.batch_execute(&ddl).await.unwrap();

    let entity = EntityConfig::new(
        "customers",
        name("src"),
        name("stg"),
        vec!["id".to_string()],
        vec!["name".to_string()],
    )
    .with_current_table(name("cur"))
    .with_history_table(name("hist"));
    let storage = PostgresStorage::new(client.clone(), WatermarkTable::named(name("wm")));
    Some((client, storage, entity))
}

fn staging(id: i64, name: &str, at: DateTime<Utc>) -> StagingRecord {
    StagingRecord {
        key: RecordKey::single(id),
        attributes: vec![Value::text(name)],
        created_at: at,
        modified_at: at,
        valid_from: at,
        valid_to: None,
    }
}

#[tokio::test]
async fn test_staging_round_trip_and_rollback() {
    let Some((_client, storage, entity)) = setup("staging").await else {
        return;
    };

    let mut tx = storage.begin().await.unwrap();
    let inserted = tx
        .insert_staging(&entity, &[staging(1, "A", ts(1)), staging(2, "B", ts(2))])
        .await
        .unwrap();
    assert_eq!(inserted, 2);
    tx.commit().await.unwrap();

    let mut tx = storage.begin().await.unwrap();
    assert_eq!(tx.clear_staging(&entity).await.unwrap(), 2);
    tx.rollback().await.unwrap();

    let mut tx = storage.begin().await.unwrap();
    let mut rows = tx.select_staging(&entity).await.unwrap();
    rows.sort_by_key(|r| r.key.to_string());
    assert_eq!(rows, vec![staging(1, "A", ts(1)), staging(2, "B", ts(2))]);
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_source_filter_is_pushed_down() {
    let Some((client, storage, entity)) = setup("source").await else {
        return;
    };
    let insert = format!(
        "INSERT INTO \"{}\" VALUES ($1, $2, $3, $4)",
        entity.source_table
    );
    {
        let client = client.lock().await;
        client
            .execute(&insert, &[&1i64, &"A", &ts(1), &ts(1)])
            .await
            .unwrap();
        // Old row, modified later
        client
            .execute(&insert, &[&2i64, &"B", &ts(1), &ts(5)])
            .await
            .unwrap();
        client
            .execute(&insert, &[&3i64, &"C", &ts(6), &ts(6)])
            .await
            .unwrap();
    }

    let mut tx = storage.begin().await.unwrap();
    assert_eq!(tx.select_source(&entity, &SourceFilter::All).await.unwrap().len(), 3);
    let mut rows = tx
        .select_source(
            &entity,
            &SourceFilter::ChangedSince {
                max_created: ts(2),
                max_modified: ts(2),
            },
        )
        .await
        .unwrap();
    rows.sort_by_key(|r| r.key.to_string());
    let ids: Vec<_> = rows.iter().map(|r| r.key.clone()).collect();
    assert_eq!(ids, vec![RecordKey::single(2), RecordKey::single(3)]);
    assert_eq!(rows[0].modified_at, ts(5));
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_upsert_and_versions() {
    let Some((_client, storage, entity)) = setup("targets").await else {
        return;
    };

    let mut tx = storage.begin().await.unwrap();
    let row = |id: i64, name: &str| CurrentRecord {
        key: RecordKey::single(id),
        attributes: vec![Value::text(name)],
    };
    tx.upsert_current(&entity, &[row(1, "A"), row(2, "B")])
        .await
        .unwrap();
    tx.upsert_current(&entity, &[row(2, "C")]).await.unwrap();
    let mut current = tx
        .select_current(&entity, &[RecordKey::single(1), RecordKey::single(2)])
        .await
        .unwrap();
    current.sort_by_key(|r| r.key.to_string());
    assert_eq!(current, vec![row(1, "A"), row(2, "C")]);

    let open = VersionRecord {
        key: RecordKey::single(2),
        attributes: vec![Value::text("B")],
        valid_from: ts(0),
        valid_to: None,
    };
    tx.insert_versions(&entity, &[open]).await.unwrap();
    let closed = tx
        .close_version(&entity, &RecordKey::single(2), ts(0), ts(1))
        .await
        .unwrap();
    assert_eq!(closed, 1);
    let still_open = tx
        .select_open_versions(&entity, &[RecordKey::single(2)])
        .await
        .unwrap();
    assert!(still_open.is_empty());
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_watermark_relation() {
    let Some((_client, storage, _entity)) = setup("watermark").await else {
        return;
    };

    let mut tx = storage.begin().await.unwrap();
    assert_eq!(tx.load_watermark("customers").await.unwrap(), None);
    let wm = Watermark::new("customers", ts(1), ts(2));
    tx.insert_watermark(&wm).await.unwrap();
    tx.update_watermark(&Watermark::new("customers", ts(3), ts(4)))
        .await
        .unwrap();
    let loaded = tx.load_watermark("customers").await.unwrap().unwrap();
    assert_eq!(loaded.max_created, ts(3));
    assert_eq!(loaded.max_modified, ts(4));

    let err = tx
        .update_watermark(&Watermark::new("unknown", ts(1), ts(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, checkpoint::WatermarkError::UnknownEntity(_)));
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_server_is_a_connection_error() {
    if std::env::var(URL_VAR).is_err() {
        return;
    }
    let result = new_postgresql_client("host=127.0.0.1 port=1 user=nobody connect_timeout=2").await;
    assert!(matches!(result, Err(StorageError::Connection(_))));
}
