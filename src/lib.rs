//! scd-sync library
//!
//! Batch synchronization of a mutable source table into a current-state
//! target (upsert) and/or a historized target (SCD Type 2 versions), driven
//! by a per-entity watermark.
//!
//! The work is done by the workspace crates:
//!
//! - `sync-core` - entity configuration and row types
//! - `checkpoint` - the watermark contract and file/memory stores
//! - `sync-storage` - the transactional storage interface and in-memory backend
//! - `scd-sync-postgresql` - the PostgreSQL backend
//! - `scd-sync-pipeline` - staging, merge, versioning and `run_cycle`
//!
//! This crate holds the command-line glue shared by the binary and its tests.
//!
//! # CLI Usage
//!
//! ```bash
//! # One cycle per entity config, both targets
//! scd-sync run --config customers.yaml --config orders.toml \
//!   --connection-string "host=localhost user=postgres dbname=dw"
//!
//! # Only the historized target, JSON summary on stdout
//! scd-sync run --config customers.yaml --target history --output json
//!
//! # Watermark maintenance (store options go before the action)
//! scd-sync watermark read --entity customers
//! scd-sync watermark init --entity customers --at 2025-01-01T00:00:00Z
//! scd-sync watermark --store filesystem --dir .scd-sync-watermarks \
//!   advance --entity customers \
//!   --value "2025-07-02T10:00:00Z,2025-07-02T11:30:00Z"
//! ```

use anyhow::Context;
use clap::{Parser, ValueEnum};
use scd_sync_postgresql::{PostgresStorage, WatermarkTable};
use sync_core::Target;

pub mod report;
pub mod watermark;

pub use report::{render_summary, EventLog};

#[derive(Parser, Clone, Debug)]
pub struct PostgresOpts {
    /// PostgreSQL connection string (libpq format or URL)
    #[arg(
        long,
        default_value = "host=localhost user=postgres",
        env = "SCD_SYNC_POSTGRES_URL"
    )]
    pub connection_string: String,

    /// Watermark (control) table, optionally schema-qualified
    #[arg(
        long,
        default_value = "control_table",
        env = "SCD_SYNC_WATERMARK_TABLE"
    )]
    pub watermark_table: String,

    /// Entity id column of the watermark table
    #[arg(long, default_value = "table_name")]
    pub watermark_entity_column: String,

    /// Max created timestamp column of the watermark table
    #[arg(long, default_value = "max_created_date")]
    pub watermark_created_column: String,

    /// Max modified timestamp column of the watermark table
    #[arg(long, default_value = "max_modified_date")]
    pub watermark_modified_column: String,
}

impl PostgresOpts {
    pub fn watermark_table(&self) -> WatermarkTable {
        WatermarkTable {
            table: self.watermark_table.clone(),
            entity_column: self.watermark_entity_column.clone(),
            created_column: self.watermark_created_column.clone(),
            modified_column: self.watermark_modified_column.clone(),
        }
    }

    pub async fn connect(&self) -> anyhow::Result<PostgresStorage> {
        PostgresStorage::connect(&self.connection_string, self.watermark_table())
            .await
            .context("Failed to connect to PostgreSQL")
    }
}

/// Targets a `run` writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TargetArg {
    Current,
    History,
    Both,
}

impl TargetArg {
    pub fn targets(self) -> Vec<Target> {
        match self {
            TargetArg::Current => vec![Target::Current],
            TargetArg::History => vec![Target::History],
            TargetArg::Both => vec![Target::Current, Target::History],
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
