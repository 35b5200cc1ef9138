//! Error types for watermark operations.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised by [`WatermarkManager`](crate::WatermarkManager) and
/// watermark store backends.
#[derive(Error, Debug)]
pub enum WatermarkError {
    /// `initialize` was called for an entity that already has a watermark.
    #[error("Watermark for entity '{0}' already exists")]
    DuplicateEntity(String),

    /// The entity has no watermark yet.
    #[error("No watermark for entity '{0}'")]
    UnknownEntity(String),

    /// An advance would move the watermark backwards. Not fatal: the
    /// stored watermark is left untouched.
    #[error(
        "Watermark regression for entity '{entity}': \
         created {current_created} -> {proposed_created}, \
         modified {current_modified} -> {proposed_modified}"
    )]
    Regression {
        entity: String,
        current_created: DateTime<Utc>,
        current_modified: DateTime<Utc>,
        proposed_created: DateTime<Utc>,
        proposed_modified: DateTime<Utc>,
    },

    /// Watermark string could not be parsed.
    #[error("Invalid watermark '{input}': {reason}")]
    Parse { input: String, reason: String },

    /// Filesystem backend failure.
    #[error("Watermark file error: {0}")]
    Io(#[from] std::io::Error),

    /// Watermark document could not be (de)serialized.
    #[error("Watermark serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failure of the backing store.
    #[error("Watermark store error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl WatermarkError {
    /// Whether this error leaves the cycle successful (only the advance is skipped).
    pub fn is_regression(&self) -> bool {
        matches!(self, WatermarkError::Regression { .. })
    }
}
