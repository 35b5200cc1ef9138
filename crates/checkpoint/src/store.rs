//! Watermark storage trait
//!
//! This module defines the WatermarkStore trait for backend-agnostic
//! watermark persistence. Business rules (duplicates, regressions) live in
//! [`WatermarkManager`](crate::WatermarkManager); stores only load and write.

use async_trait::async_trait;

use crate::{Watermark, WatermarkError};

/// Trait for watermark storage operations.
///
/// This trait abstracts the storage backend for watermark operations,
/// allowing the same watermark logic to work with:
/// - Filesystem storage (`FilesystemStore`)
/// - In-memory storage (`MemoryStore`)
/// - A transactional storage session (the watermark relation)
///
/// Methods take `&mut self` so that a store can be an open transaction.
#[async_trait]
pub trait WatermarkStore: Send {
    /// Load the watermark of an entity. Returns None if it doesn't exist.
    async fn load_watermark(&mut self, entity: &str) -> Result<Option<Watermark>, WatermarkError>;

    /// Persist a watermark for an entity that has none yet.
    async fn insert_watermark(&mut self, watermark: &Watermark) -> Result<(), WatermarkError>;

    /// Overwrite the watermark of an existing entity.
    async fn update_watermark(&mut self, watermark: &Watermark) -> Result<(), WatermarkError>;
}
