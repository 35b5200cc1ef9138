//! Error types for pipeline operations.

use checkpoint::WatermarkError;
use sync_core::ConfigError;
use sync_storage::StorageError;
use thiserror::Error;

use crate::events::Step;

/// Errors that end a pipeline call.
///
/// A watermark regression is only an error for a direct
/// [`advance_watermark`](crate::advance_watermark) call; inside a cycle it
/// is logged and the cycle still succeeds.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The entity configuration is unusable. Raised before any storage access.
    #[error("Invalid entity configuration: {0}")]
    Config(#[from] ConfigError),

    /// The storage could not be reached when opening a step.
    #[error("Storage unreachable: {0}")]
    Connection(#[source] StorageError),

    #[error("Watermark for entity '{0}' already exists")]
    DuplicateEntity(String),

    #[error("No watermark for entity '{0}'")]
    UnknownEntity(String),

    #[error("Watermark regression for entity '{entity}': {source}")]
    Regression {
        entity: String,
        #[source]
        source: WatermarkError,
    },

    /// A step failed and its transaction was rolled back.
    #[error("Step {step} failed for entity '{entity}': {source}")]
    StepTransaction {
        step: Step,
        entity: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl SyncError {
    pub(crate) fn step<E>(step: Step, entity: &str, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        SyncError::StepTransaction {
            step,
            entity: entity.to_string(),
            source: source.into(),
        }
    }

    /// Classify an error raised by the watermark manager inside a step.
    pub(crate) fn from_watermark(step: Step, entity: &str, err: WatermarkError) -> Self {
        match err {
            WatermarkError::DuplicateEntity(e) => SyncError::DuplicateEntity(e),
            WatermarkError::UnknownEntity(e) => SyncError::UnknownEntity(e),
            err @ WatermarkError::Regression { .. } => SyncError::Regression {
                entity: entity.to_string(),
                source: err,
            },
            other => SyncError::step(step, entity, other),
        }
    }

    /// The step that failed, for step-level failures.
    pub fn failed_step(&self) -> Option<Step> {
        match self {
            SyncError::StepTransaction { step, .. } => Some(*step),
            _ => None,
        }
    }

    pub fn is_regression(&self) -> bool {
        matches!(self, SyncError::Regression { .. })
    }
}
