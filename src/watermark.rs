//! `scd-sync watermark` commands.
//!
//! The same read/init/advance contract runs either on the watermark
//! relation of the PostgreSQL database or on a directory of JSON files.

use anyhow::{Context, Result};
use checkpoint::{FilesystemStore, SystemClock, Watermark, WatermarkManager, WatermarkStore};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use scd_sync_pipeline::{
    advance_watermark, initialize_watermark, initialize_watermark_at, read_watermark,
};
use std::path::PathBuf;
use sync_storage::Storage;
use tracing::info;

use crate::PostgresOpts;

#[derive(Parser, Clone, Debug)]
pub struct WatermarkArgs {
    #[command(subcommand)]
    pub action: WatermarkAction,

    /// Where watermarks are kept
    #[arg(long, value_enum, default_value = "postgres")]
    pub store: StoreKind,

    /// Directory of the filesystem store
    #[arg(long, default_value = ".scd-sync-watermarks")]
    pub dir: PathBuf,

    #[command(flatten)]
    pub postgres: PostgresOpts,
}

#[derive(Subcommand, Clone, Debug, PartialEq, Eq)]
pub enum WatermarkAction {
    /// Print the watermark of an entity
    Read {
        #[arg(long)]
        entity: String,
    },

    /// Create the watermark of an entity
    Init {
        #[arg(long)]
        entity: String,

        /// Value of both timestamps (RFC 3339, default: now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Move the watermark of an entity forward
    Advance {
        #[arg(long)]
        entity: String,

        /// New maxima, `<created>,<modified>` in RFC 3339
        #[arg(long, value_name = "CREATED,MODIFIED")]
        value: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    Postgres,
    Filesystem,
}

impl WatermarkAction {
    pub fn entity(&self) -> &str {
        match self {
            WatermarkAction::Read { entity }
            | WatermarkAction::Init { entity, .. }
            | WatermarkAction::Advance { entity, .. } => entity,
        }
    }
}

/// Run a watermark command against the selected store.
pub async fn run(args: &WatermarkArgs) -> Result<Watermark> {
    match args.store {
        StoreKind::Postgres => {
            let storage = args.postgres.connect().await?;
            apply_on_storage(&storage, &args.action).await
        }
        StoreKind::Filesystem => {
            info!("Using watermark directory {}", args.dir.display());
            let mut store = FilesystemStore::new(&args.dir);
            apply_on_store(&mut store, &args.action).await
        }
    }
}

/// Run a watermark command in its own transaction on a storage session.
pub async fn apply_on_storage(storage: &dyn Storage, action: &WatermarkAction) -> Result<Watermark> {
    let entity = action.entity();
    let watermark = match action {
        WatermarkAction::Read { .. } => read_watermark(storage, entity).await,
        WatermarkAction::Init { at: None, .. } => {
            initialize_watermark(storage, entity, SystemClock).await
        }
        WatermarkAction::Init { at: Some(at), .. } => {
            initialize_watermark_at(storage, entity, *at).await
        }
        WatermarkAction::Advance { value, .. } => {
            let target = Watermark::from_cli_string(entity, value)?;
            advance_watermark(storage, entity, target.max_created, target.max_modified).await
        }
    };
    watermark.with_context(|| format!("Watermark command failed for '{entity}'"))
}

/// Run a watermark command on a standalone watermark store.
pub async fn apply_on_store<S: WatermarkStore + ?Sized>(
    store: &mut S,
    action: &WatermarkAction,
) -> Result<Watermark> {
    let manager = WatermarkManager::new();
    let entity = action.entity();
    let watermark = match action {
        WatermarkAction::Read { .. } => manager.read(store, entity).await,
        WatermarkAction::Init { at: None, .. } => manager.initialize(store, entity).await,
        WatermarkAction::Init { at: Some(at), .. } => {
            manager.initialize_at(store, entity, *at).await
        }
        WatermarkAction::Advance { value, .. } => {
            let target = Watermark::from_cli_string(entity, value)?;
            manager
                .advance(store, entity, target.max_created, target.max_modified)
                .await
        }
    };
    watermark.with_context(|| format!("Watermark command failed for '{entity}'"))
}
