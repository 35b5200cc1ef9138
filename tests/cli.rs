//! Tests for the command-line glue: summaries, event logs and the
//! watermark commands on both stores.

use checkpoint::{FilesystemStore, FixedClock, Watermark};
use chrono::{DateTime, TimeZone, Utc};
use clap::Parser;
use scd_sync::watermark::{apply_on_storage, apply_on_store, StoreKind, WatermarkAction, WatermarkArgs};
use scd_sync::{render_summary, EventLog, OutputFormat, PostgresOpts, TargetArg};
use scd_sync_pipeline::{run_cycle, CycleOptions, CycleSummary, SyncError};
use std::sync::Arc;
use sync_core::{EntityConfig, RecordKey, SourceRecord, Target, Value};
use sync_storage::MemoryStorage;
use tokio_test::{assert_err, assert_ok};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 2, 10, 0, 0).unwrap()
}

fn customers() -> EntityConfig {
    EntityConfig::new(
        "customers",
        "src_customers",
        "stg_customers",
        vec!["cust_id".to_string()],
        vec!["phone_no".to_string()],
    )
    .with_current_table("customers")
    .with_history_table("dim_customers")
}

async fn first_cycle(options: CycleOptions) -> CycleSummary {
    let storage = MemoryStorage::new();
    let entity = customers();
    for (id, phone) in [(1, "A"), (2, "B")] {
        storage
            .put_source(
                &entity.source_table,
                SourceRecord {
                    key: RecordKey::single(id),
                    attributes: vec![Value::text(phone)],
                    created_at: t0(),
                    modified_at: t0(),
                },
            )
            .await;
    }
    run_cycle(&storage, &entity, &options).await.unwrap()
}

// ============================================================================
// Summaries
// ============================================================================

#[tokio::test]
async fn test_text_summary() {
    let summary = first_cycle(CycleOptions::default().with_clock(FixedClock(t0()))).await;
    let text = render_summary(&summary, OutputFormat::Text).unwrap();

    assert!(text.starts_with("Entity: customers\n"));
    assert!(text.contains("full load: 2 rows staged"));
    assert!(text.contains("current: 2 inserted, 0 updated, 0 unchanged"));
    assert!(text.contains("history: 2 inserted, 0 closed"));
    assert!(text.contains("watermark: (none) -> "));
    assert!(text.contains("(initialized)"));
    assert!(text.contains("apply_versions"));
}

#[tokio::test]
async fn test_json_summary() {
    let summary = first_cycle(CycleOptions::default().with_clock(FixedClock(t0()))).await;
    let json = render_summary(&summary, OutputFormat::Json).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    assert_eq!(value["entity"], "customers");
    assert_eq!(value["load"]["mode"], "full");
    assert_eq!(value["load"]["rows_loaded"], 2);
    assert_eq!(value["watermark_update"], "initialized");
    assert!(value["previous_watermark"].is_null());
    assert_eq!(value["steps"][0]["step"], "read_watermark");
}

// ============================================================================
// Event log
// ============================================================================

#[tokio::test]
async fn test_event_log_appends_one_line_per_step() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    std::fs::write(&path, "{\"previous\":true}\n").unwrap();

    let log = EventLog::append(&path).unwrap();
    let summary = first_cycle(
        CycleOptions::default()
            .with_clock(FixedClock(t0()))
            .with_observer(Arc::new(log)),
    )
    .await;

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 1 + summary.steps.len());
    assert_eq!(lines[0], "{\"previous\":true}");

    let events: Vec<serde_json::Value> = lines[1..]
        .iter()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(events[0]["step"], "read_watermark");
    assert_eq!(events[1]["step"], "full_load");
    assert_eq!(events[1]["rows"], 2);
    assert!(events.iter().all(|e| e["outcome"] == "succeeded"));
    assert!(events.iter().all(|e| e["entity"] == "customers"));
}

// ============================================================================
// Watermark commands
// ============================================================================

#[tokio::test]
async fn test_watermark_commands_on_storage() {
    let storage = MemoryStorage::new();
    let read = WatermarkAction::Read {
        entity: "customers".to_string(),
    };

    let err = assert_err!(apply_on_storage(&storage, &read).await);
    assert!(matches!(
        err.downcast_ref::<SyncError>(),
        Some(SyncError::UnknownEntity(_))
    ));

    let init = WatermarkAction::Init {
        entity: "customers".to_string(),
        at: Some(t0()),
    };
    let created = assert_ok!(apply_on_storage(&storage, &init).await);
    assert_eq!(created, Watermark::new("customers", t0(), t0()));

    let err = assert_err!(apply_on_storage(&storage, &init).await);
    assert!(matches!(
        err.downcast_ref::<SyncError>(),
        Some(SyncError::DuplicateEntity(_))
    ));

    let advance = WatermarkAction::Advance {
        entity: "customers".to_string(),
        value: "2025-07-02T10:00:00Z,2025-07-02T12:00:00Z".to_string(),
    };
    let advanced = assert_ok!(apply_on_storage(&storage, &advance).await);
    assert_eq!(
        advanced.max_modified,
        Utc.with_ymd_and_hms(2025, 7, 2, 12, 0, 0).unwrap()
    );
    assert_eq!(assert_ok!(apply_on_storage(&storage, &read).await), advanced);

    let backwards = WatermarkAction::Advance {
        entity: "customers".to_string(),
        value: "2025-07-01T00:00:00Z,2025-07-01T00:00:00Z".to_string(),
    };
    let err = assert_err!(apply_on_storage(&storage, &backwards).await);
    assert!(err
        .downcast_ref::<SyncError>()
        .is_some_and(SyncError::is_regression));
    assert_eq!(storage.watermark("customers").await, Some(advanced));
}

#[tokio::test]
async fn test_watermark_commands_on_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FilesystemStore::new(dir.path());

    let init = WatermarkAction::Init {
        entity: "orders".to_string(),
        at: Some(t0()),
    };
    assert_ok!(apply_on_store(&mut store, &init).await);
    assert!(dir.path().join("watermark_orders.json").exists());

    let advance = WatermarkAction::Advance {
        entity: "orders".to_string(),
        value: "2025-07-03T00:00:00Z,2025-07-03T00:00:00Z".to_string(),
    };
    let advanced = assert_ok!(apply_on_store(&mut store, &advance).await);

    // A fresh store over the same directory sees the advance
    let mut reopened = FilesystemStore::new(dir.path());
    let read = WatermarkAction::Read {
        entity: "orders".to_string(),
    };
    assert_eq!(assert_ok!(apply_on_store(&mut reopened, &read).await), advanced);

    let malformed = WatermarkAction::Advance {
        entity: "orders".to_string(),
        value: "yesterday".to_string(),
    };
    assert_err!(apply_on_store(&mut reopened, &malformed).await);
}

// ============================================================================
// Argument parsing
// ============================================================================

#[test]
fn test_parse_watermark_args() {
    let args = WatermarkArgs::try_parse_from([
        "watermark",
        "--store",
        "filesystem",
        "--dir",
        "/tmp/wm",
        "init",
        "--entity",
        "customers",
        "--at",
        "2025-07-02T10:00:00Z",
    ])
    .unwrap();

    assert_eq!(args.store, StoreKind::Filesystem);
    assert_eq!(args.dir, std::path::PathBuf::from("/tmp/wm"));
    assert_eq!(
        args.action,
        WatermarkAction::Init {
            entity: "customers".to_string(),
            at: Some(t0()),
        }
    );
    assert_eq!(args.action.entity(), "customers");
}

#[test]
fn test_watermark_table_options() {
    let opts = PostgresOpts::try_parse_from([
        "opts",
        "--connection-string",
        "host=db",
        "--watermark-table",
        "etl.control_table",
    ])
    .unwrap();

    let table = opts.watermark_table();
    assert_eq!(table.table, "etl.control_table");
    assert_eq!(table.entity_column, "table_name");
    assert_eq!(table.created_column, "max_created_date");
    assert_eq!(table.modified_column, "max_modified_date");
}

#[test]
fn test_target_arg() {
    assert_eq!(TargetArg::Current.targets(), vec![Target::Current]);
    assert_eq!(TargetArg::History.targets(), vec![Target::History]);
    assert_eq!(
        TargetArg::Both.targets(),
        vec![Target::Current, Target::History]
    );
}
