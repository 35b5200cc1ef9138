//! In-memory watermark storage implementation.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::{Watermark, WatermarkError, WatermarkStore};

/// Keeps watermarks in a map. Nothing survives the process.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, Watermark>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl WatermarkStore for MemoryStore {
    async fn load_watermark(&mut self, entity: &str) -> Result<Option<Watermark>, WatermarkError> {
        Ok(self.entries.get(entity).cloned())
    }

    async fn insert_watermark(&mut self, watermark: &Watermark) -> Result<(), WatermarkError> {
        self.entries
            .insert(watermark.entity.clone(), watermark.clone());
        Ok(())
    }

    async fn update_watermark(&mut self, watermark: &Watermark) -> Result<(), WatermarkError> {
        match self.entries.get_mut(&watermark.entity) {
            Some(entry) => {
                *entry = watermark.clone();
                Ok(())
            }
            None => Err(WatermarkError::UnknownEntity(watermark.entity.clone())),
        }
    }
}
