//! Step transaction boundaries.

use sync_storage::{Storage, StorageTx};
use tracing::{debug, warn};

use crate::{Step, SyncError};

/// Open the transaction of a step. An unreachable store is reported as
/// `SyncError::Connection`.
pub(crate) async fn begin<'s>(
    storage: &'s dyn Storage,
    step: Step,
    entity: &str,
) -> Result<Box<dyn StorageTx + 's>, SyncError> {
    debug!("Opening {} transaction for '{}'", step, entity);
    storage.begin().await.map_err(|e| {
        if e.is_connection() {
            SyncError::Connection(e)
        } else {
            SyncError::step(step, entity, e)
        }
    })
}

/// Commit on success, roll back on failure. A failed rollback is logged;
/// the original error is the one returned.
pub(crate) async fn finish<T, E>(
    tx: Box<dyn StorageTx + '_>,
    result: Result<T, E>,
    step: Step,
    entity: &str,
) -> Result<T, SyncError>
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| SyncError::step(step, entity, e))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!("Rollback of {step} for '{entity}' failed: {rollback_err}");
            }
            Err(SyncError::step(step, entity, err))
        }
    }
}
