//! Source row selection.

use chrono::{DateTime, Utc};
use sync_core::SourceRecord;

/// Which source rows a staging load copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFilter {
    /// Every source row (full load).
    All,
    /// Rows created after `max_created` OR modified after `max_modified`.
    ChangedSince {
        max_created: DateTime<Utc>,
        max_modified: DateTime<Utc>,
    },
}

impl SourceFilter {
    /// Evaluate the filter against a row. Backends that cannot push the
    /// predicate down to the store use this directly.
    pub fn matches(&self, record: &SourceRecord) -> bool {
        match self {
            SourceFilter::All => true,
            SourceFilter::ChangedSince {
                max_created,
                max_modified,
            } => record.created_at > *max_created || record.modified_at > *max_modified,
        }
    }
}
