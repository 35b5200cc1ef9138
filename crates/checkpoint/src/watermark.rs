//! The watermark entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::WatermarkError;

/// Highest created/modified timestamps synchronized for one entity.
///
/// # CLI Format
///
/// `<max_created>,<max_modified>`, both RFC 3339, e.g.
/// `2025-07-02T10:00:00+00:00,2025-07-02T11:30:00+00:00`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    /// Entity identifier
    pub entity: String,
    /// Highest source creation timestamp processed
    pub max_created: DateTime<Utc>,
    /// Highest source modification timestamp processed
    pub max_modified: DateTime<Utc>,
}

impl Watermark {
    pub fn new(
        entity: impl Into<String>,
        max_created: DateTime<Utc>,
        max_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            entity: entity.into(),
            max_created,
            max_modified,
        }
    }

    /// Whether moving to the proposed values would decrease either timestamp.
    pub fn would_regress(
        &self,
        proposed_created: DateTime<Utc>,
        proposed_modified: DateTime<Utc>,
    ) -> bool {
        proposed_created < self.max_created || proposed_modified < self.max_modified
    }

    /// Component-wise maximum of this watermark and the observed values.
    ///
    /// Callers use this to compute an advance that never decreases either
    /// timestamp, e.g. when a cycle only staged updates of old rows.
    pub fn merged_with(
        &self,
        observed_created: Option<DateTime<Utc>>,
        observed_modified: Option<DateTime<Utc>>,
    ) -> (DateTime<Utc>, DateTime<Utc>) {
        let created = observed_created.map_or(self.max_created, |c| c.max(self.max_created));
        let modified = observed_modified.map_or(self.max_modified, |m| m.max(self.max_modified));
        (created, modified)
    }

    /// Convert to CLI-friendly string format.
    pub fn to_cli_string(&self) -> String {
        format!(
            "{},{}",
            self.max_created.to_rfc3339(),
            self.max_modified.to_rfc3339()
        )
    }

    /// Parse the format produced by [`Watermark::to_cli_string`].
    pub fn from_cli_string(entity: impl Into<String>, s: &str) -> Result<Self, WatermarkError> {
        let parse_error = |reason: String| WatermarkError::Parse {
            input: s.to_string(),
            reason,
        };

        let (created, modified) = s
            .split_once(',')
            .ok_or_else(|| parse_error("expected '<created>,<modified>'".to_string()))?;
        let max_created = DateTime::parse_from_rfc3339(created.trim())
            .map_err(|e| parse_error(format!("created: {e}")))?
            .with_timezone(&Utc);
        let max_modified = DateTime::parse_from_rfc3339(modified.trim())
            .map_err(|e| parse_error(format!("modified: {e}")))?
            .with_timezone(&Utc);

        Ok(Self::new(entity, max_created, max_modified))
    }
}
