//! Watermark operations on a storage session.
//!
//! Each call runs in its own transaction on the watermark relation that
//! lives beside the source, staging and target relations.

use checkpoint::{Clock, Watermark, WatermarkError, WatermarkManager};
use chrono::{DateTime, Utc};
use sync_storage::{Storage, StorageTx};
use tracing::warn;

use crate::transaction::begin;
use crate::{Step, SyncError};

/// Read the watermark of an entity, `None` if it was never initialized.
pub async fn try_read_watermark(
    storage: &dyn Storage,
    entity: &str,
) -> Result<Option<Watermark>, SyncError> {
    let step = Step::ReadWatermark;
    let mut tx = begin(storage, step, entity).await?;
    let result = WatermarkManager::new().try_read(tx.as_mut(), entity).await;
    commit_or_rollback(tx, result, step, entity).await
}

/// Read the watermark of an entity.
///
/// # Errors
///
/// `SyncError::UnknownEntity` if the entity has never been initialized.
pub async fn read_watermark(storage: &dyn Storage, entity: &str) -> Result<Watermark, SyncError> {
    try_read_watermark(storage, entity)
        .await?
        .ok_or_else(|| SyncError::UnknownEntity(entity.to_string()))
}

/// Create the watermark of an entity with both timestamps set to the
/// clock's current instant.
///
/// # Errors
///
/// `SyncError::DuplicateEntity` if the entity already has a watermark.
pub async fn initialize_watermark<C: Clock>(
    storage: &dyn Storage,
    entity: &str,
    clock: C,
) -> Result<Watermark, SyncError> {
    let at = clock.now();
    initialize_watermark_at(storage, entity, at).await
}

/// Create the watermark of an entity with both timestamps set to `at`.
pub async fn initialize_watermark_at(
    storage: &dyn Storage,
    entity: &str,
    at: DateTime<Utc>,
) -> Result<Watermark, SyncError> {
    let step = Step::InitializeWatermark;
    let mut tx = begin(storage, step, entity).await?;
    let result = WatermarkManager::new()
        .initialize_at(tx.as_mut(), entity, at)
        .await;
    commit_or_rollback(tx, result, step, entity).await
}

/// Move the watermark of an entity.
///
/// # Errors
///
/// - `SyncError::UnknownEntity` if the entity has never been initialized
/// - `SyncError::Regression` if either value is lower than the stored one;
///   the stored watermark is left unchanged
pub async fn advance_watermark(
    storage: &dyn Storage,
    entity: &str,
    new_max_created: DateTime<Utc>,
    new_max_modified: DateTime<Utc>,
) -> Result<Watermark, SyncError> {
    let step = Step::AdvanceWatermark;
    let mut tx = begin(storage, step, entity).await?;
    let result = WatermarkManager::new()
        .advance(tx.as_mut(), entity, new_max_created, new_max_modified)
        .await;
    commit_or_rollback(tx, result, step, entity).await
}

/// Like `transaction::finish`, but keeps the watermark error kinds.
pub(crate) async fn commit_or_rollback<T>(
    tx: Box<dyn StorageTx + '_>,
    result: Result<T, WatermarkError>,
    step: Step,
    entity: &str,
) -> Result<T, SyncError> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| SyncError::step(step, entity, e))?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!("Rollback of {step} for '{entity}' failed: {rollback_err}");
            }
            Err(SyncError::from_watermark(step, entity, e))
        }
    }
}
