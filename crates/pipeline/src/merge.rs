//! Current-state upsert.

use serde::Serialize;
use std::collections::HashMap;
use sync_core::{CurrentRecord, EntityConfig, RecordKey, StagingRecord, Value};
use sync_storage::{Storage, StorageError, StorageTx};
use tracing::info;

use crate::snapshot::latest_per_key;
use crate::transaction::{begin, finish};
use crate::{Step, SyncError};

/// Outcome of a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub inserted: u64,
    pub updated: u64,
    /// Keys whose tracked values already matched; not rewritten
    pub unchanged: u64,
}

impl MergeReport {
    pub fn written(&self) -> u64 {
        self.inserted + self.updated
    }
}

/// Upsert staging rows into the current-state target, within `tx`.
///
/// New keys are inserted, existing keys get their tracked attributes
/// overwritten, and keys whose values already match are left alone, so
/// applying the same rows twice writes nothing the second time.
pub async fn merge(
    tx: &mut dyn StorageTx,
    entity: &EntityConfig,
    rows: Vec<StagingRecord>,
) -> Result<MergeReport, StorageError> {
    let snapshot = latest_per_key(&entity.entity, rows)?;
    if snapshot.is_empty() {
        return Ok(MergeReport::default());
    }

    let keys: Vec<RecordKey> = snapshot.iter().map(|r| r.key.clone()).collect();
    let existing: HashMap<RecordKey, Vec<Value>> = tx
        .select_current(entity, &keys)
        .await?
        .into_iter()
        .map(|r| (r.key, r.attributes))
        .collect();

    let mut report = MergeReport::default();
    let mut writes = Vec::new();
    for row in &snapshot {
        match existing.get(&row.key) {
            None => {
                report.inserted += 1;
                writes.push(CurrentRecord::from(row));
            }
            Some(attributes) if *attributes == row.attributes => report.unchanged += 1,
            Some(_) => {
                report.updated += 1;
                writes.push(CurrentRecord::from(row));
            }
        }
    }

    if !writes.is_empty() {
        tx.upsert_current(entity, &writes).await?;
    }
    Ok(report)
}

/// Merge the current staging contents in one transaction.
pub async fn merge_staging(
    storage: &dyn Storage,
    entity: &EntityConfig,
) -> Result<MergeReport, SyncError> {
    let mut tx = begin(storage, Step::Merge, &entity.entity).await?;
    let result = match tx.select_staging(entity).await {
        Ok(rows) => merge(tx.as_mut(), entity, rows).await,
        Err(e) => Err(e),
    };
    let report = finish(tx, result, Step::Merge, &entity.entity).await?;

    info!(
        "Merged '{}': {} inserted, {} updated, {} unchanged",
        entity.entity, report.inserted, report.updated, report.unchanged
    );
    Ok(report)
}
