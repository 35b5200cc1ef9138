//! Core types for the scd-sync framework.
//!
//! This crate provides the foundational types shared by every scd-sync
//! crate:
//!
//! - [`Value`] - Column value representation, independent of the storage dialect
//! - [`RecordKey`] - Composite business key of a tracked entity
//! - [`SourceRecord`], [`StagingRecord`], [`CurrentRecord`], [`VersionRecord`] -
//!   The rows flowing through the pipeline
//! - [`EntityConfig`] - Per-entity description of tables and columns, loaded from YAML/TOML
//!
//! # Architecture
//!
//! ```text
//! sync-core (this crate)
//!    │
//!    ├─── checkpoint           (watermark store, depends on chrono only)
//!    ├─── sync-storage         (storage traits + in-memory backend)
//!    ├─── scd-sync-postgresql  (PostgreSQL backend)
//!    └─── scd-sync-pipeline    (staging, merge, versioning, cycle)
//! ```
//!
//! # Example
//!
//! ```rust
//! use sync_core::{RecordKey, Value};
//!
//! let key = RecordKey::single(Value::Int(42));
//! assert_eq!(key.to_string(), "(42)");
//! ```

pub mod schema;
pub mod types;
pub mod values;

// Re-exports for convenience
pub use schema::{ConfigError, EntityConfig, Target};
pub use types::{CurrentRecord, RecordKey, SourceRecord, StagingRecord, VersionRecord};
pub use values::Value;
