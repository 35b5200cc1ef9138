//! Watermark management for scd-sync
//!
//! A watermark records, per tracked entity, the highest "created" and
//! "modified" timestamps that have been synchronized into the target.
//! The next cycle only stages source rows newer than either value.
//!
//! # Architecture
//!
//! This crate provides a storage-agnostic watermark system that:
//! - Defines the [`Watermark`] entry and its CLI string format
//! - Enforces the initialize/advance/read contract in [`WatermarkManager`]
//!   (duplicate and unknown entities, monotonic advances)
//! - Supports multiple storage backends via the [`WatermarkStore`] trait
//!
//! ## Storage Backends
//!
//! - `FilesystemStore` - Stores one JSON document per entity
//! - `MemoryStore` - Keeps entries in memory (tests, dry runs)
//! - The transactional storage sessions of `sync-storage` and
//!   `scd-sync-postgresql`, where the watermark relation lives next to
//!   the source, staging and target relations.

mod clock;
mod error;
mod filesystem;
mod manager;
mod memory;
pub mod store;
mod watermark;


pub use clock::{Clock, FixedClock, SystemClock};
pub use error::WatermarkError;
pub use filesystem::FilesystemStore;
pub use manager::WatermarkManager;
pub use memory::MemoryStore;
pub use store::WatermarkStore;
pub use watermark::Watermark;
