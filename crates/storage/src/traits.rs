//! Storage and transaction traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use checkpoint::WatermarkStore;
use sync_core::{
    CurrentRecord, EntityConfig, RecordKey, SourceRecord, StagingRecord, Value, VersionRecord,
};

use crate::{SourceFilter, StorageError};

/// A storage session.
///
/// One `Storage` is acquired per cycle and passed explicitly to every
/// component. Dropping it releases the underlying connection.
///
/// # Usage Pattern
///
/// ```ignore
/// let mut tx = storage.begin().await?;
/// match write_step(tx.as_mut()).await {
///     Ok(report) => { tx.commit().await?; Ok(report) }
///     Err(e) => { tx.rollback().await?; Err(e) }
/// }
/// ```
#[async_trait]
pub trait Storage: Send + Sync {
    /// Open a transaction. Fails with `StorageError::Connection` when the
    /// store is unreachable.
    async fn begin(&self) -> Result<Box<dyn StorageTx + '_>, StorageError>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// An open transaction.
///
/// Nothing written through a `StorageTx` is visible to other sessions
/// before [`StorageTx::commit`]; [`StorageTx::rollback`] discards every
/// write of the transaction. The watermark relation is reachable through
/// the [`WatermarkStore`] supertrait so a watermark write can share the
/// transaction machinery of the other steps.
#[async_trait]
pub trait StorageTx: WatermarkStore + Send {
    /// Read source rows selected by `filter`.
    async fn select_source(
        &mut self,
        entity: &EntityConfig,
        filter: &SourceFilter,
    ) -> Result<Vec<SourceRecord>, StorageError>;

    /// Remove every staging row. Returns the number of rows removed.
    async fn clear_staging(&mut self, entity: &EntityConfig) -> Result<u64, StorageError>;

    /// Append rows to staging.
    async fn insert_staging(
        &mut self,
        entity: &EntityConfig,
        rows: &[StagingRecord],
    ) -> Result<u64, StorageError>;

    /// Read every staging row. Row order is unspecified.
    async fn select_staging(
        &mut self,
        entity: &EntityConfig,
    ) -> Result<Vec<StagingRecord>, StorageError>;

    /// Read current-state target rows for the given keys.
    async fn select_current(
        &mut self,
        entity: &EntityConfig,
        keys: &[RecordKey],
    ) -> Result<Vec<CurrentRecord>, StorageError>;

    /// Insert rows into the current-state target, overwriting tracked
    /// attributes of rows whose key already exists.
    async fn upsert_current(
        &mut self,
        entity: &EntityConfig,
        rows: &[CurrentRecord],
    ) -> Result<u64, StorageError>;

    /// Read the open (end marker null) versions for the given keys.
    async fn select_open_versions(
        &mut self,
        entity: &EntityConfig,
        keys: &[RecordKey],
    ) -> Result<Vec<VersionRecord>, StorageError>;

    /// Set the end marker of the open version of `key` that started at
    /// `valid_from`. Returns the number of rows closed.
    async fn close_version(
        &mut self,
        entity: &EntityConfig,
        key: &RecordKey,
        valid_from: DateTime<Utc>,
        valid_to: DateTime<Utc>,
    ) -> Result<u64, StorageError>;

    /// Overwrite the tracked attributes of the open version of `key`.
    async fn update_open_version(
        &mut self,
        entity: &EntityConfig,
        key: &RecordKey,
        attributes: &[Value],
    ) -> Result<u64, StorageError>;

    /// Append version rows to the historized target.
    async fn insert_versions(
        &mut self,
        entity: &EntityConfig,
        rows: &[VersionRecord],
    ) -> Result<u64, StorageError>;

    /// Make every write of this transaction durable.
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    /// Discard every write of this transaction.
    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}
