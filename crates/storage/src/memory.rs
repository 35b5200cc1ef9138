//! In-memory storage backend.
//!
//! Relations are kept per table name. A transaction holds the storage lock
//! for its whole lifetime and works on a private copy of the tables that
//! replaces the shared state on commit, so a rolled back (or dropped)
//! transaction leaves no trace.
//!
//! Fault injection (`fail_on`, `set_unreachable`) lets tests exercise
//! rollback paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use checkpoint::{Watermark, WatermarkError, WatermarkStore};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use sync_core::{
    CurrentRecord, EntityConfig, RecordKey, SourceRecord, StagingRecord, Value, VersionRecord,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::{SourceFilter, Storage, StorageError, StorageTx};

#[derive(Debug, Default, Clone)]
struct Tables {
    source: HashMap<String, Vec<SourceRecord>>,
    staging: HashMap<String, Vec<StagingRecord>>,
    current: HashMap<String, Vec<CurrentRecord>>,
    history: HashMap<String, Vec<VersionRecord>>,
    watermarks: HashMap<String, Watermark>,
}

#[derive(Debug, Default)]
struct Faults {
    unreachable: bool,
    operations: HashSet<&'static str>,
}

/// In-memory implementation of [`Storage`].
#[derive(Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<StdMutex<Faults>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `begin` fail with a connection error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock_faults().unreachable = unreachable;
    }

    /// Make every call of a `StorageTx` operation fail, e.g.
    /// `"insert_versions"` or `"update_watermark"`.
    pub fn fail_on(&self, operation: &'static str) {
        self.lock_faults().operations.insert(operation);
    }

    /// Remove every injected fault.
    pub fn clear_faults(&self) {
        let mut faults = self.lock_faults();
        faults.unreachable = false;
        faults.operations.clear();
    }

    fn lock_faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        // A poisoned lock only means a test panicked while holding it
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace a source row (matched by key), as an external writer would.
    pub async fn put_source(&self, table: &str, record: SourceRecord) {
        let mut tables = self.tables.lock().await;
        let rows = tables.source.entry(table.to_string()).or_default();
        match rows.iter_mut().find(|r| r.key == record.key) {
            Some(existing) => *existing = record,
            None => rows.push(record),
        }
    }

    pub async fn source_rows(&self, table: &str) -> Vec<SourceRecord> {
        let tables = self.tables.lock().await;
        tables.source.get(table).cloned().unwrap_or_default()
    }

    pub async fn staging_rows(&self, table: &str) -> Vec<StagingRecord> {
        let tables = self.tables.lock().await;
        tables.staging.get(table).cloned().unwrap_or_default()
    }

    /// Seed staging directly, bypassing delta capture.
    pub async fn put_staging(&self, table: &str, rows: Vec<StagingRecord>) {
        let mut tables = self.tables.lock().await;
        tables.staging.insert(table.to_string(), rows);
    }

    pub async fn current_rows(&self, table: &str) -> Vec<CurrentRecord> {
        let tables = self.tables.lock().await;
        tables.current.get(table).cloned().unwrap_or_default()
    }

    /// Every version of the historized target, ordered by key then start.
    pub async fn versions(&self, table: &str) -> Vec<VersionRecord> {
        let tables = self.tables.lock().await;
        let mut rows = tables.history.get(table).cloned().unwrap_or_default();
        rows.sort_by(|a, b| {
            a.key
                .to_string()
                .cmp(&b.key.to_string())
                .then(a.valid_from.cmp(&b.valid_from))
        });
        rows
    }

    /// Seed the historized target directly.
    pub async fn put_versions(&self, table: &str, rows: Vec<VersionRecord>) {
        let mut tables = self.tables.lock().await;
        tables.history.insert(table.to_string(), rows);
    }

    pub async fn watermark(&self, entity: &str) -> Option<Watermark> {
        let tables = self.tables.lock().await;
        tables.watermarks.get(entity).cloned()
    }

    /// Overwrite a watermark outside any transaction, as a concurrent
    /// writer would.
    pub async fn put_watermark(&self, watermark: Watermark) {
        let mut tables = self.tables.lock().await;
        tables
            .watermarks
            .insert(watermark.entity.clone(), watermark);
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn begin(&self) -> Result<Box<dyn StorageTx + '_>, StorageError> {
        let unreachable = self.lock_faults().unreachable;
        if unreachable {
            return Err(StorageError::Connection(
                "in-memory storage marked unreachable".to_string(),
            ));
        }

        let guard = self.tables.clone().lock_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(MemoryTx {
            guard,
            working,
            faults: self.faults.clone(),
        }))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    faults: Arc<StdMutex<Faults>>,
}

impl MemoryTx {
    fn check(&self, operation: &'static str) -> Result<(), StorageError> {
        let faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        if faults.operations.contains(operation) {
            return Err(StorageError::backend(
                operation,
                format!("injected failure in {operation}"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for MemoryTx {
    async fn load_watermark(&mut self, entity: &str) -> Result<Option<Watermark>, WatermarkError> {
        self.check("load_watermark")?;
        Ok(self.working.watermarks.get(entity).cloned())
    }

    async fn insert_watermark(&mut self, watermark: &Watermark) -> Result<(), WatermarkError> {
        self.check("insert_watermark")?;
        if self.working.watermarks.contains_key(&watermark.entity) {
            return Err(WatermarkError::DuplicateEntity(watermark.entity.clone()));
        }
        self.working
            .watermarks
            .insert(watermark.entity.clone(), watermark.clone());
        Ok(())
    }

    async fn update_watermark(&mut self, watermark: &Watermark) -> Result<(), WatermarkError> {
        self.check("update_watermark")?;
        match self.working.watermarks.get_mut(&watermark.entity) {
            Some(entry) => {
                *entry = watermark.clone();
                Ok(())
            }
            None => Err(WatermarkError::UnknownEntity(watermark.entity.clone())),
        }
    }
}

#[async_trait]
impl StorageTx for MemoryTx {
    async fn select_source(
        &mut self,
        entity: &EntityConfig,
        filter: &SourceFilter,
    ) -> Result<Vec<SourceRecord>, StorageError> {
        self.check("select_source")?;
        Ok(self
            .working
            .source
            .get(&entity.source_table)
            .map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default())
    }

    async fn clear_staging(&mut self, entity: &EntityConfig) -> Result<u64, StorageError> {
        self.check("clear_staging")?;
        let removed = self
            .working
            .staging
            .insert(entity.staging_table.clone(), Vec::new())
            .map_or(0, |rows| rows.len());
        Ok(removed as u64)
    }

    async fn insert_staging(
        &mut self,
        entity: &EntityConfig,
        rows: &[StagingRecord],
    ) -> Result<u64, StorageError> {
        self.check("insert_staging")?;
        self.working
            .staging
            .entry(entity.staging_table.clone())
            .or_default()
            .extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn select_staging(
        &mut self,
        entity: &EntityConfig,
    ) -> Result<Vec<StagingRecord>, StorageError> {
        self.check("select_staging")?;
        Ok(self
            .working
            .staging
            .get(&entity.staging_table)
            .cloned()
            .unwrap_or_default())
    }

    async fn select_current(
        &mut self,
        entity: &EntityConfig,
        keys: &[RecordKey],
    ) -> Result<Vec<CurrentRecord>, StorageError> {
        self.check("select_current")?;
        let table = current_table(entity)?;
        let wanted: HashSet<&RecordKey> = keys.iter().collect();
        Ok(self
            .working
            .current
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| wanted.contains(&r.key))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upsert_current(
        &mut self,
        entity: &EntityConfig,
        rows: &[CurrentRecord],
    ) -> Result<u64, StorageError> {
        self.check("upsert_current")?;
        let table = current_table(entity)?.to_string();
        let target = self.working.current.entry(table).or_default();
        for row in rows {
            match target.iter_mut().find(|r| r.key == row.key) {
                Some(existing) => existing.attributes = row.attributes.clone(),
                None => target.push(row.clone()),
            }
        }
        Ok(rows.len() as u64)
    }

    async fn select_open_versions(
        &mut self,
        entity: &EntityConfig,
        keys: &[RecordKey],
    ) -> Result<Vec<VersionRecord>, StorageError> {
        self.check("select_open_versions")?;
        let table = history_table(entity)?;
        let wanted: HashSet<&RecordKey> = keys.iter().collect();
        Ok(self
            .working
            .history
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.is_current() && wanted.contains(&r.key))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn close_version(
        &mut self,
        entity: &EntityConfig,
        key: &RecordKey,
        valid_from: DateTime<Utc>,
        valid_to: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        self.check("close_version")?;
        let table = history_table(entity)?;
        let mut closed = 0;
        if let Some(rows) = self.working.history.get_mut(table) {
            for row in rows
                .iter_mut()
                .filter(|r| r.is_current() && r.key == *key && r.valid_from == valid_from)
            {
                row.valid_to = Some(valid_to);
                closed += 1;
            }
        }
        Ok(closed)
    }

    async fn update_open_version(
        &mut self,
        entity: &EntityConfig,
        key: &RecordKey,
        attributes: &[Value],
    ) -> Result<u64, StorageError> {
        self.check("update_open_version")?;
        let table = history_table(entity)?;
        let mut updated = 0;
        if let Some(rows) = self.working.history.get_mut(table) {
            for row in rows.iter_mut().filter(|r| r.is_current() && r.key == *key) {
                row.attributes = attributes.to_vec();
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn insert_versions(
        &mut self,
        entity: &EntityConfig,
        rows: &[VersionRecord],
    ) -> Result<u64, StorageError> {
        self.check("insert_versions")?;
        let table = history_table(entity)?.to_string();
        self.working
            .history
            .entry(table)
            .or_default()
            .extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        self.check("commit")?;
        let MemoryTx {
            mut guard, working, ..
        } = *self;
        *guard = working;
        debug!("Committed in-memory transaction");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        debug!("Rolled back in-memory transaction");
        Ok(())
    }
}

fn current_table(entity: &EntityConfig) -> Result<&str, StorageError> {
    entity.current_table.as_deref().ok_or_else(|| {
        StorageError::Integrity(format!(
            "entity '{}' has no current-state table",
            entity.entity
        ))
    })
}

fn history_table(entity: &EntityConfig) -> Result<&str, StorageError> {
    entity.history_table.as_deref().ok_or_else(|| {
        StorageError::Integrity(format!("entity '{}' has no history table", entity.entity))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config() -> EntityConfig {
        EntityConfig::new(
            "customers",
            "src",
            "staging",
            vec!["cust_id".into()],
            vec!["phone_no".into()],
        )
        .with_history_table("target")
        .with_current_table("current")
    }

    fn source(id: i64, phone: &str) -> SourceRecord {
        let ts = Utc.with_ymd_and_hms(2025, 7, 2, 0, 0, 0).unwrap();
        SourceRecord {
            key: RecordKey::single(id),
            attributes: vec![Value::text(phone)],
            created_at: ts,
            modified_at: ts,
        }
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let storage = MemoryStorage::new();
        let config = config();
        let staged = StagingRecord::from(source(1, "A"));

        let mut tx = storage.begin().await.unwrap();
        tx.insert_staging(&config, &[staged.clone()]).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(storage.staging_rows("staging").await, vec![staged]);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let storage = MemoryStorage::new();
        let config = config();

        let mut tx = storage.begin().await.unwrap();
        tx.insert_staging(&config, &[StagingRecord::from(source(1, "A"))])
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert!(storage.staging_rows("staging").await.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let storage = MemoryStorage::new();
        let config = config();

        {
            let mut tx = storage.begin().await.unwrap();
            tx.upsert_current(&config, &[CurrentRecord {
                key: RecordKey::single(1),
                attributes: vec![Value::text("A")],
            }])
            .await
            .unwrap();
        }

        assert!(storage.current_rows("current").await.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_key() {
        let storage = MemoryStorage::new();
        let config = config();

        let mut tx = storage.begin().await.unwrap();
        for phone in ["A", "B"] {
            tx.upsert_current(&config, &[CurrentRecord {
                key: RecordKey::single(1),
                attributes: vec![Value::text(phone)],
            }])
            .await
            .unwrap();
        }
        tx.commit().await.unwrap();

        let rows = storage.current_rows("current").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].attributes, vec![Value::text("B")]);
    }

    #[tokio::test]
    async fn test_injected_fault() {
        let storage = MemoryStorage::new();
        storage.fail_on("insert_versions");

        let mut tx = storage.begin().await.unwrap();
        let err = tx.insert_versions(&config(), &[]).await.unwrap_err();
        assert!(err.to_string().contains("injected failure"));
        tx.rollback().await.unwrap();

        storage.set_unreachable(true);
        let err = storage.begin().await.err().unwrap();
        assert!(err.is_connection());

        storage.clear_faults();
        assert!(storage.begin().await.is_ok());
    }

    #[tokio::test]
    async fn test_put_source_replaces_by_key() {
        let storage = MemoryStorage::new();
        storage.put_source("src", source(1, "A")).await;
        storage.put_source("src", source(1, "C")).await;
        storage.put_source("src", source(2, "B")).await;

        let rows = storage.source_rows("src").await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].attributes, vec![Value::text("C")]);
    }
}
