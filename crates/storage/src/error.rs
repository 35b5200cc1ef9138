//! Error types for storage operations.

use thiserror::Error;

/// Errors that can occur while talking to a storage backend.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Storage is unreachable or the session could not be established.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A statement failed.
    #[error("{operation} failed: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A column value could not be converted.
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// Stored data violates a model invariant.
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// Operation attempted on a transaction that already finished.
    #[error("Transaction already finished")]
    Finished,
}

impl StorageError {
    /// Wrap a backend error with the operation that raised it.
    pub fn backend<E>(operation: &'static str, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        StorageError::Backend {
            operation,
            source: source.into(),
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, StorageError::Connection(_))
    }
}

impl From<StorageError> for checkpoint::WatermarkError {
    fn from(err: StorageError) -> Self {
        checkpoint::WatermarkError::Backend(Box::new(err))
    }
}
