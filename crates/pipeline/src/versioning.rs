//! SCD Type 2 version management.
//!
//! For every key in staging the current version (end marker null) of the
//! historized target is compared with the staged values:
//!
//! | current version            | staged row                  | action                        |
//! |----------------------------|-----------------------------|-------------------------------|
//! | none                       | any                         | insert open version           |
//! | same tracked values        | any                         | nothing                       |
//! | starts before staged row   | different values            | close at staged start, insert |
//! | starts at staged start     | different values            | correct open version in place |
//! | starts after staged row    | different values            | skip as stale                 |
//!
//! A closed version ends exactly where its successor starts, so the
//! versions of a key are contiguous and never overlap.

use serde::Serialize;
use std::collections::HashMap;
use sync_core::{EntityConfig, RecordKey, StagingRecord, VersionRecord};
use sync_storage::{Storage, StorageError, StorageTx};
use tracing::{debug, info, warn};

use crate::snapshot::latest_per_key;
use crate::transaction::{begin, finish};
use crate::{Step, SyncError};

/// Outcome of applying staging to the historized target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VersionReport {
    /// New open versions
    pub inserted: u64,
    /// Versions closed because their key changed
    pub closed: u64,
    pub unchanged: u64,
    /// Open versions overwritten by a staged row with the same start
    pub corrected: u64,
    /// Staged rows older than the current version
    pub stale: u64,
}

impl VersionReport {
    pub fn written(&self) -> u64 {
        self.inserted + self.closed + self.corrected
    }
}

/// Apply staging rows to the historized target, within `tx`.
///
/// Idempotent: applying the same rows again finds every key unchanged.
///
/// # Errors
///
/// `StorageError::Integrity` when a key has more than one current version,
/// when staging holds conflicting rows for a key at the same instant, or
/// when a version to close or correct is no longer open.
pub async fn apply_versions(
    tx: &mut dyn StorageTx,
    entity: &EntityConfig,
    rows: Vec<StagingRecord>,
) -> Result<VersionReport, StorageError> {
    let snapshot = latest_per_key(&entity.entity, rows)?;
    if snapshot.is_empty() {
        return Ok(VersionReport::default());
    }

    let keys: Vec<RecordKey> = snapshot.iter().map(|r| r.key.clone()).collect();
    let mut current: HashMap<RecordKey, VersionRecord> = HashMap::new();
    for version in tx.select_open_versions(entity, &keys).await? {
        let key = version.key.clone();
        if current.insert(key.clone(), version).is_some() {
            return Err(StorageError::Integrity(format!(
                "'{}' has more than one current version for key {key}",
                entity.entity
            )));
        }
    }

    let mut report = VersionReport::default();
    let mut new_versions = Vec::new();
    for row in &snapshot {
        let Some(open) = current.get(&row.key) else {
            report.inserted += 1;
            new_versions.push(VersionRecord::open_from(row));
            continue;
        };

        if open.attributes == row.attributes {
            report.unchanged += 1;
        } else if row.valid_from < open.valid_from {
            warn!(
                entity = %entity.entity,
                key = %row.key,
                "Skipping stale staging row: starts {} before the current version ({})",
                row.valid_from,
                open.valid_from
            );
            report.stale += 1;
        } else if row.valid_from == open.valid_from {
            let updated = tx
                .update_open_version(entity, &row.key, &row.attributes)
                .await?;
            expect_one(updated, "correct", entity, &row.key)?;
            debug!("Corrected current version of {} in place", row.key);
            report.corrected += 1;
        } else {
            let closed = tx
                .close_version(entity, &row.key, open.valid_from, row.valid_from)
                .await?;
            expect_one(closed, "close", entity, &row.key)?;
            report.closed += 1;
            report.inserted += 1;
            new_versions.push(VersionRecord::open_from(row));
        }
    }

    if !new_versions.is_empty() {
        tx.insert_versions(entity, &new_versions).await?;
    }
    Ok(report)
}

fn expect_one(
    affected: u64,
    action: &str,
    entity: &EntityConfig,
    key: &RecordKey,
) -> Result<(), StorageError> {
    if affected == 1 {
        Ok(())
    } else {
        Err(StorageError::Integrity(format!(
            "expected to {action} one current version of '{}' for key {key}, affected {affected}",
            entity.entity
        )))
    }
}

/// Version the current staging contents in one transaction.
pub async fn version_staging(
    storage: &dyn Storage,
    entity: &EntityConfig,
) -> Result<VersionReport, SyncError> {
    let mut tx = begin(storage, Step::ApplyVersions, &entity.entity).await?;
    let result = match tx.select_staging(entity).await {
        Ok(rows) => apply_versions(tx.as_mut(), entity, rows).await,
        Err(e) => Err(e),
    };
    let report = finish(tx, result, Step::ApplyVersions, &entity.entity).await?;

    info!(
        "Versioned '{}': {} inserted, {} closed, {} corrected, {} unchanged, {} stale",
        entity.entity,
        report.inserted,
        report.closed,
        report.corrected,
        report.unchanged,
        report.stale
    );
    Ok(report)
}
