//! Filesystem-based watermark storage implementation.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::{Watermark, WatermarkError, WatermarkStore};

/// Filesystem implementation of WatermarkStore trait.
///
/// Stores one `watermark_<entity>.json` document per entity in a directory.
/// Writes go through a temporary file and a rename so a crash never leaves
/// a truncated watermark behind.
pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    /// Create a new FilesystemStore with the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the directory path.
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn path_for(&self, entity: &str) -> PathBuf {
        let safe: String = entity
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("watermark_{safe}.json"))
    }

    fn write(&self, watermark: &Watermark) -> Result<(), WatermarkError> {
        std::fs::create_dir_all(&self.dir)?;

        let path = self.path_for(&watermark.entity);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(watermark)?)?;
        std::fs::rename(&tmp, &path)?;

        tracing::info!(
            "Stored watermark for '{}' to {}: {}",
            watermark.entity,
            path.display(),
            watermark.to_cli_string()
        );
        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for FilesystemStore {
    async fn load_watermark(&mut self, entity: &str) -> Result<Option<Watermark>, WatermarkError> {
        let path = self.path_for(entity);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)?;
        let watermark: Watermark = serde_json::from_str(&content)?;
        Ok(Some(watermark))
    }

    async fn insert_watermark(&mut self, watermark: &Watermark) -> Result<(), WatermarkError> {
        self.write(watermark)
    }

    async fn update_watermark(&mut self, watermark: &Watermark) -> Result<(), WatermarkError> {
        if !self.path_for(&watermark.entity).exists() {
            return Err(WatermarkError::UnknownEntity(watermark.entity.clone()));
        }
        self.write(watermark)
    }
}
