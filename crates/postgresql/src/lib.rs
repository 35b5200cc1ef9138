//! PostgreSQL storage backend for scd-sync
//!
//! Implements the `Storage` / `StorageTx` traits of `sync-storage` with
//! `tokio-postgres`. Every statement is parameterized; values are bound
//! according to the parameter types PostgreSQL reports for the prepared
//! statement.
//!
//! Expected relations (names come from the entity configuration):
//! - source and staging: key, tracked, created, modified (staging also start, end)
//! - current-state target: key, tracked, with a unique constraint over the key
//! - historized target: key, tracked, start, end
//! - watermark: entity id, max created, max modified (`control_table` by default)

mod client;
pub mod sql;
mod storage;
mod value;

pub use client::new_postgresql_client;
pub use sql::WatermarkTable;
pub use storage::{PostgresStorage, PostgresTx};
