//! The scd-sync pipeline.
//!
//! Components, each usable on its own:
//!
//! - [`full_load`] / [`incremental_load`] - replace staging with source rows
//!   (all of them, or those changed since the watermark)
//! - [`merge`] / [`merge_staging`] - upsert staging into a current-state target
//! - [`apply_versions`] / [`version_staging`] - SCD Type 2 versioning of
//!   staging into a historized target
//! - [`initialize_watermark`], [`read_watermark`], [`advance_watermark`] -
//!   the watermark contract on a storage session
//!
//! [`run_cycle`] composes them for one entity.
//!
//! # Example
//!
//! ```rust,ignore
//! use scd_sync_pipeline::{run_cycle, CycleOptions};
//!
//! let config = EntityConfig::from_file("customers.yaml")?;
//! let summary = run_cycle(&storage, &config, &CycleOptions::default()).await?;
//! println!("staged {} rows", summary.load.rows_loaded);
//! ```

mod cycle;
mod error;
mod events;
mod merge;
mod snapshot;
mod staging;
mod transaction;
mod versioning;
mod watermark;

pub use cycle::{run_cycle, CycleOptions, CycleSummary, WatermarkUpdate};
pub use error::SyncError;
pub use events::{log_step, Step, StepObserver, StepOutcome, StepReport};
pub use merge::{merge, merge_staging, MergeReport};
pub use snapshot::latest_per_key;
pub use staging::{full_load, incremental_load, replace_staging, LoadMode, LoadReport};
pub use versioning::{apply_versions, version_staging, VersionReport};
pub use watermark::{
    advance_watermark, initialize_watermark, initialize_watermark_at, read_watermark,
    try_read_watermark,
};
