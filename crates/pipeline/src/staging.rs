//! Delta capture into staging.
//!
//! Both loads replace the staging contents: staging is cleared and
//! repopulated inside one transaction, so a failed load leaves the previous
//! staging set untouched.

use chrono::{DateTime, Utc};
use checkpoint::Watermark;
use serde::Serialize;
use std::fmt;
use sync_core::{EntityConfig, StagingRecord};
use sync_storage::{SourceFilter, Storage, StorageError, StorageTx};
use tracing::{debug, info};

use crate::transaction::{begin, finish};
use crate::{Step, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Every source row (first cycle)
    Full,
    /// Rows created or modified after the watermark
    Incremental,
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadMode::Full => f.write_str("full"),
            LoadMode::Incremental => f.write_str("incremental"),
        }
    }
}

/// Outcome of a staging load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub mode: LoadMode,
    pub rows_loaded: u64,
    /// Highest created timestamp among the staged rows
    pub max_created: Option<DateTime<Utc>>,
    /// Highest modified timestamp among the staged rows
    pub max_modified: Option<DateTime<Utc>>,
}

/// Replace staging with every source row.
pub async fn full_load(storage: &dyn Storage, entity: &EntityConfig) -> Result<LoadReport, SyncError> {
    load(storage, entity, LoadMode::Full, SourceFilter::All).await
}

/// Replace staging with the source rows created or modified after the
/// watermark. No qualifying rows leaves staging empty.
pub async fn incremental_load(
    storage: &dyn Storage,
    entity: &EntityConfig,
    watermark: &Watermark,
) -> Result<LoadReport, SyncError> {
    let filter = SourceFilter::ChangedSince {
        max_created: watermark.max_created,
        max_modified: watermark.max_modified,
    };
    load(storage, entity, LoadMode::Incremental, filter).await
}

async fn load(
    storage: &dyn Storage,
    entity: &EntityConfig,
    mode: LoadMode,
    filter: SourceFilter,
) -> Result<LoadReport, SyncError> {
    let step = match mode {
        LoadMode::Full => Step::FullLoad,
        LoadMode::Incremental => Step::IncrementalLoad,
    };
    let mut tx = begin(storage, step, &entity.entity).await?;
    let result = replace_staging(tx.as_mut(), entity, mode, &filter).await;
    let report = finish(tx, result, step, &entity.entity).await?;

    info!(
        "Staged {} rows for '{}' ({} load)",
        report.rows_loaded, entity.entity, report.mode
    );
    Ok(report)
}

/// Clear staging and copy the rows selected by `filter`, within `tx`.
pub async fn replace_staging(
    tx: &mut dyn StorageTx,
    entity: &EntityConfig,
    mode: LoadMode,
    filter: &SourceFilter,
) -> Result<LoadReport, StorageError> {
    let source = tx.select_source(entity, filter).await?;
    let cleared = tx.clear_staging(entity).await?;
    debug!("Cleared {} staging rows for '{}'", cleared, entity.entity);

    let max_created = source.iter().map(|r| r.created_at).max();
    let max_modified = source.iter().map(|r| r.modified_at).max();
    let rows: Vec<StagingRecord> = source.into_iter().map(StagingRecord::from).collect();

    let rows_loaded = if rows.is_empty() {
        0
    } else {
        tx.insert_staging(entity, &rows).await?
    };

    Ok(LoadReport {
        mode,
        rows_loaded,
        max_created,
        max_modified,
    })
}
