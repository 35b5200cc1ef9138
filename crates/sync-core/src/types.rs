//! Row types flowing through the synchronization pipeline.
//!
//! Attributes are positional: `attributes[i]` holds the value of the i-th
//! entry of [`EntityConfig::tracked_columns`](crate::EntityConfig).

use crate::values::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Composite business key of a tracked entity.
///
/// Values are ordered like [`EntityConfig::key_columns`](crate::EntityConfig).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey(pub Vec<Value>);

impl RecordKey {
    /// Create a key from its column values.
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Create a single-column key.
    pub fn single(value: impl Into<Value>) -> Self {
        Self(vec![value.into()])
    }

    /// Key column values.
    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// A row of the mutable system of record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub key: RecordKey,
    pub attributes: Vec<Value>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// A source row selected into staging for the current cycle.
///
/// `valid_from` is derived from the source row's modified timestamp and
/// `valid_to` is always `None` while the row sits in staging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingRecord {
    pub key: RecordKey,
    pub attributes: Vec<Value>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl From<SourceRecord> for StagingRecord {
    fn from(record: SourceRecord) -> Self {
        Self {
            valid_from: record.modified_at,
            valid_to: None,
            key: record.key,
            attributes: record.attributes,
            created_at: record.created_at,
            modified_at: record.modified_at,
        }
    }
}

/// Row of the non-historized (current-state) target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentRecord {
    pub key: RecordKey,
    pub attributes: Vec<Value>,
}

impl From<&StagingRecord> for CurrentRecord {
    fn from(record: &StagingRecord) -> Self {
        Self {
            key: record.key.clone(),
            attributes: record.attributes.clone(),
        }
    }
}

/// Row of the historized (SCD Type 2) target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub key: RecordKey,
    pub attributes: Vec<Value>,
    pub valid_from: DateTime<Utc>,
    /// `None` marks the current version of the key.
    pub valid_to: Option<DateTime<Utc>>,
}

impl VersionRecord {
    /// Open-ended version built from a staging row.
    pub fn open_from(record: &StagingRecord) -> Self {
        Self {
            key: record.key.clone(),
            attributes: record.attributes.clone(),
            valid_from: record.valid_from,
            valid_to: None,
        }
    }

    /// Whether this is the current version of its key.
    pub fn is_current(&self) -> bool {
        self.valid_to.is_none()
    }
}
