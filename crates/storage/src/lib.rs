//! Storage abstraction for scd-sync.
//!
//! This crate defines the `Storage` / `StorageTx` traits that every
//! pipeline component talks to. A `Storage` is the explicit session object
//! of a cycle; each logical step opens one `StorageTx` and either commits
//! or rolls it back as a whole.
//!
//! The traits expose parameterized operations on the data model
//! (source, staging, current target, historized target, watermark). They
//! never carry business rules: which rows qualify, when a version closes
//! and whether a watermark may move are decided by the pipeline.
//!
//! Backends:
//! - [`MemoryStorage`] - snapshot-isolated in-memory backend with fault injection
//! - `PostgresStorage` in the `scd-sync-postgresql` crate

mod error;
mod filter;
mod memory;
mod traits;

pub use error::StorageError;
pub use filter::SourceFilter;
pub use memory::MemoryStorage;
pub use traits::{Storage, StorageTx};
