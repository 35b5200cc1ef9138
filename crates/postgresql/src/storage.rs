//! Transactional PostgreSQL storage session.
//!
//! A `PostgresTx` holds the shared client through an owned mutex guard for
//! its whole lifetime, so statements of concurrent transactions never
//! interleave on one connection. The transaction is an explicit
//! `BEGIN`/`COMMIT`/`ROLLBACK`; a transaction dropped without either is
//! rolled back on a spawned task that keeps the guard until it finishes.

use async_trait::async_trait;
use checkpoint::{Watermark, WatermarkError, WatermarkStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use sync_core::{
    CurrentRecord, EntityConfig, RecordKey, SourceRecord, StagingRecord, Value, VersionRecord,
};
use sync_storage::{SourceFilter, Storage, StorageError, StorageTx};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_postgres::{Client, Row};
use tracing::{debug, warn};

use crate::client::{map_pg_error, new_postgresql_client};
use crate::sql::{self, WatermarkTable};
use crate::value::{bind, optional_timestamp, param_refs, timestamp, values_from_row};

/// PostgreSQL-backed [`Storage`].
pub struct PostgresStorage {
    client: Arc<Mutex<Client>>,
    watermark_table: WatermarkTable,
}

impl PostgresStorage {
    /// Connect with a libpq-style connection string.
    pub async fn connect(
        connection_string: &str,
        watermark_table: WatermarkTable,
    ) -> Result<Self, StorageError> {
        let client = new_postgresql_client(connection_string).await?;
        Ok(Self::new(client, watermark_table))
    }

    /// Wrap an existing shared client.
    pub fn new(client: Arc<Mutex<Client>>, watermark_table: WatermarkTable) -> Self {
        Self {
            client,
            watermark_table,
        }
    }

    pub fn watermark_table(&self) -> &WatermarkTable {
        &self.watermark_table
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn begin(&self) -> Result<Box<dyn StorageTx + '_>, StorageError> {
        let client = self.client.clone().lock_owned().await;
        if client.is_closed() {
            return Err(StorageError::Connection(
                "PostgreSQL connection is closed".to_string(),
            ));
        }
        client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| map_pg_error(&client, "begin", e))?;
        debug!("PostgreSQL transaction started");
        Ok(Box::new(PostgresTx {
            client: Some(client),
            watermark_table: self.watermark_table.clone(),
        }))
    }

    fn backend_name(&self) -> &'static str {
        "postgresql"
    }
}

/// An open PostgreSQL transaction.
pub struct PostgresTx {
    client: Option<OwnedMutexGuard<Client>>,
    watermark_table: WatermarkTable,
}

impl PostgresTx {
    fn client(&self) -> Result<&Client, StorageError> {
        self.client.as_deref().ok_or(StorageError::Finished)
    }

    async fn query(
        &self,
        operation: &'static str,
        sql: &str,
        values: &[Value],
    ) -> Result<Vec<Row>, StorageError> {
        let client = self.client()?;
        let stmt = client
            .prepare(sql)
            .await
            .map_err(|e| map_pg_error(client, operation, e))?;
        let params = bind(values, stmt.params())?;
        let refs = param_refs(&params);
        client
            .query(&stmt, &refs)
            .await
            .map_err(|e| map_pg_error(client, operation, e))
    }

    async fn execute(
        &self,
        operation: &'static str,
        sql: &str,
        values: &[Value],
    ) -> Result<u64, StorageError> {
        let client = self.client()?;
        let stmt = client
            .prepare(sql)
            .await
            .map_err(|e| map_pg_error(client, operation, e))?;
        let params = bind(values, stmt.params())?;
        let refs = param_refs(&params);
        client
            .execute(&stmt, &refs)
            .await
            .map_err(|e| map_pg_error(client, operation, e))
    }

    async fn finish(&mut self, command: &'static str) -> Result<(), StorageError> {
        let client = self.client.take().ok_or(StorageError::Finished)?;
        client
            .batch_execute(command)
            .await
            .map_err(|e| map_pg_error(&client, "finish transaction", e))?;
        debug!("PostgreSQL transaction finished with {command}");
        Ok(())
    }
}

impl Drop for PostgresTx {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("PostgreSQL transaction dropped while open, rolling back");
                handle.spawn(async move {
                    if let Err(e) = client.batch_execute("ROLLBACK").await {
                        warn!("Rollback of abandoned transaction failed: {e}");
                    }
                });
            }
            Err(_) => warn!("PostgreSQL transaction dropped outside a runtime"),
        }
    }
}

fn target_table<'a>(table: Option<&'a String>, what: &str) -> Result<&'a str, StorageError> {
    table
        .map(String::as_str)
        .ok_or_else(|| StorageError::Integrity(format!("no {what} table configured")))
}

// Column layout: keys, tracked, created, modified[, start, end]
fn source_from_row(row: &Row, nk: usize, nt: usize) -> Result<SourceRecord, StorageError> {
    Ok(SourceRecord {
        key: RecordKey::new(values_from_row(row, 0, nk)?),
        attributes: values_from_row(row, nk, nt)?,
        created_at: timestamp(row, nk + nt)?,
        modified_at: timestamp(row, nk + nt + 1)?,
    })
}

fn staging_from_row(row: &Row, nk: usize, nt: usize) -> Result<StagingRecord, StorageError> {
    Ok(StagingRecord {
        key: RecordKey::new(values_from_row(row, 0, nk)?),
        attributes: values_from_row(row, nk, nt)?,
        created_at: timestamp(row, nk + nt)?,
        modified_at: timestamp(row, nk + nt + 1)?,
        valid_from: timestamp(row, nk + nt + 2)?,
        valid_to: optional_timestamp(row, nk + nt + 3)?,
    })
}

fn key_values(keys: &[RecordKey]) -> Vec<Value> {
    keys.iter()
        .flat_map(|k| k.values().iter().cloned())
        .collect()
}

#[async_trait]
impl StorageTx for PostgresTx {
    async fn select_source(
        &mut self,
        entity: &EntityConfig,
        filter: &SourceFilter,
    ) -> Result<Vec<SourceRecord>, StorageError> {
        let (sql, params) = match filter {
            SourceFilter::All => (sql::select_source(entity, false), Vec::new()),
            SourceFilter::ChangedSince {
                max_created,
                max_modified,
            } => (
                sql::select_source(entity, true),
                vec![Value::Timestamp(*max_created), Value::Timestamp(*max_modified)],
            ),
        };
        let rows = self.query("select source", &sql, &params).await?;

        let nk = entity.key_columns.len();
        let nt = entity.tracked_columns.len();
        rows.iter().map(|row| source_from_row(row, nk, nt)).collect()
    }

    async fn clear_staging(&mut self, entity: &EntityConfig) -> Result<u64, StorageError> {
        self.execute("clear staging", &sql::delete_staging(entity), &[])
            .await
    }

    async fn insert_staging(
        &mut self,
        entity: &EntityConfig,
        rows: &[StagingRecord],
    ) -> Result<u64, StorageError> {
        let mut inserted = 0;
        for chunk in rows.chunks(sql::rows_per_statement(sql::staging_width(entity))) {
            let mut params = Vec::with_capacity(chunk.len() * sql::staging_width(entity));
            for row in chunk {
                params.extend(row.key.values().iter().cloned());
                params.extend(row.attributes.iter().cloned());
                params.push(Value::Timestamp(row.created_at));
                params.push(Value::Timestamp(row.modified_at));
                params.push(Value::Timestamp(row.valid_from));
                params.push(row.valid_to.into());
            }
            let sql = sql::insert_staging(entity, chunk.len());
            inserted += self.execute("insert staging", &sql, &params).await?;
        }
        Ok(inserted)
    }

    async fn select_staging(
        &mut self,
        entity: &EntityConfig,
    ) -> Result<Vec<StagingRecord>, StorageError> {
        let rows = self
            .query("select staging", &sql::select_staging(entity), &[])
            .await?;

        let nk = entity.key_columns.len();
        let nt = entity.tracked_columns.len();
        rows.iter().map(|row| staging_from_row(row, nk, nt)).collect()
    }

    async fn select_current(
        &mut self,
        entity: &EntityConfig,
        keys: &[RecordKey],
    ) -> Result<Vec<CurrentRecord>, StorageError> {
        let table = target_table(entity.current_table.as_ref(), "current-state")?;
        let nk = entity.key_columns.len();
        let nt = entity.tracked_columns.len();

        let mut found = Vec::new();
        for chunk in keys.chunks(sql::rows_per_statement(nk)) {
            let sql = sql::select_current(entity, table, chunk.len());
            let rows = self
                .query("select current", &sql, &key_values(chunk))
                .await?;
            for row in &rows {
                found.push(CurrentRecord {
                    key: RecordKey::new(values_from_row(row, 0, nk)?),
                    attributes: values_from_row(row, nk, nt)?,
                });
            }
        }
        Ok(found)
    }

    async fn upsert_current(
        &mut self,
        entity: &EntityConfig,
        rows: &[CurrentRecord],
    ) -> Result<u64, StorageError> {
        let table = target_table(entity.current_table.as_ref(), "current-state")?;
        let width = sql::current_width(entity);

        let mut written = 0;
        for chunk in rows.chunks(sql::rows_per_statement(width)) {
            let mut params = Vec::with_capacity(chunk.len() * width);
            for row in chunk {
                params.extend(row.key.values().iter().cloned());
                params.extend(row.attributes.iter().cloned());
            }
            let sql = sql::upsert_current(entity, table, chunk.len());
            written += self.execute("upsert current", &sql, &params).await?;
        }
        Ok(written)
    }

    async fn select_open_versions(
        &mut self,
        entity: &EntityConfig,
        keys: &[RecordKey],
    ) -> Result<Vec<VersionRecord>, StorageError> {
        let table = target_table(entity.history_table.as_ref(), "historized")?;
        let nk = entity.key_columns.len();
        let nt = entity.tracked_columns.len();

        let mut found = Vec::new();
        for chunk in keys.chunks(sql::rows_per_statement(nk)) {
            let sql = sql::select_open_versions(entity, table, chunk.len());
            let rows = self
                .query("select open versions", &sql, &key_values(chunk))
                .await?;
            for row in &rows {
                found.push(VersionRecord {
                    key: RecordKey::new(values_from_row(row, 0, nk)?),
                    attributes: values_from_row(row, nk, nt)?,
                    valid_from: timestamp(row, nk + nt)?,
                    valid_to: optional_timestamp(row, nk + nt + 1)?,
                });
            }
        }
        Ok(found)
    }

    async fn close_version(
        &mut self,
        entity: &EntityConfig,
        key: &RecordKey,
        valid_from: DateTime<Utc>,
        valid_to: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let table = target_table(entity.history_table.as_ref(), "historized")?;
        let mut params = vec![Value::Timestamp(valid_to)];
        params.extend(key.values().iter().cloned());
        params.push(Value::Timestamp(valid_from));
        self.execute("close version", &sql::close_version(entity, table), &params)
            .await
    }

    async fn update_open_version(
        &mut self,
        entity: &EntityConfig,
        key: &RecordKey,
        attributes: &[Value],
    ) -> Result<u64, StorageError> {
        let table = target_table(entity.history_table.as_ref(), "historized")?;
        let mut params = attributes.to_vec();
        params.extend(key.values().iter().cloned());
        self.execute(
            "update open version",
            &sql::update_open_version(entity, table),
            &params,
        )
        .await
    }

    async fn insert_versions(
        &mut self,
        entity: &EntityConfig,
        rows: &[VersionRecord],
    ) -> Result<u64, StorageError> {
        let table = target_table(entity.history_table.as_ref(), "historized")?;
        let width = sql::history_width(entity);

        let mut inserted = 0;
        for chunk in rows.chunks(sql::rows_per_statement(width)) {
            let mut params = Vec::with_capacity(chunk.len() * width);
            for row in chunk {
                params.extend(row.key.values().iter().cloned());
                params.extend(row.attributes.iter().cloned());
                params.push(Value::Timestamp(row.valid_from));
                params.push(row.valid_to.into());
            }
            let sql = sql::insert_versions(entity, table, chunk.len());
            inserted += self.execute("insert versions", &sql, &params).await?;
        }
        Ok(inserted)
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let mut tx = self;
        tx.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        let mut tx = self;
        tx.finish("ROLLBACK").await
    }
}

#[async_trait]
impl WatermarkStore for PostgresTx {
    async fn load_watermark(&mut self, entity: &str) -> Result<Option<Watermark>, WatermarkError> {
        let sql = self.watermark_table.select_sql();
        let rows = self
            .query("load watermark", &sql, &[Value::text(entity)])
            .await?;
        match rows.first() {
            None => Ok(None),
            Some(row) => Ok(Some(Watermark::new(
                entity,
                timestamp(row, 0)?,
                timestamp(row, 1)?,
            ))),
        }
    }

    async fn insert_watermark(&mut self, watermark: &Watermark) -> Result<(), WatermarkError> {
        let sql = self.watermark_table.insert_sql();
        self.execute("insert watermark", &sql, &watermark_params(watermark))
            .await?;
        Ok(())
    }

    async fn update_watermark(&mut self, watermark: &Watermark) -> Result<(), WatermarkError> {
        let sql = self.watermark_table.update_sql();
        let updated = self
            .execute("update watermark", &sql, &watermark_params(watermark))
            .await?;
        if updated == 0 {
            return Err(WatermarkError::UnknownEntity(watermark.entity.clone()));
        }
        Ok(())
    }
}

fn watermark_params(watermark: &Watermark) -> Vec<Value> {
    vec![
        Value::text(watermark.entity.as_str()),
        Value::Timestamp(watermark.max_created),
        Value::Timestamp(watermark.max_modified),
    ]
}
