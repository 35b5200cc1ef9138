//! Entity configuration.
//!
//! An [`EntityConfig`] names the relations and columns of one tracked
//! entity. It is supplied per cycle instead of being baked into the
//! pipeline, and is usually loaded from a YAML or TOML file:
//!
//! ```yaml
//! entity: customers
//! source_table: src_customers
//! staging_table: stg_customers
//! history_table: dim_customers
//! key_columns: [cust_id]
//! tracked_columns: [phone_no]
//! created_column: created_date
//! modified_column: modified_date
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

// ============================================================================
// Error Types
// ============================================================================

/// Error type for entity configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Error reading config file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Error parsing YAML
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Error parsing TOML
    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Error parsing JSON
    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Unsupported config file extension
    #[error("Unsupported config file extension: {0}")]
    UnsupportedFormat(String),

    /// A required column list is empty
    #[error("Entity '{entity}' has no {what} columns")]
    MissingColumns { entity: String, what: &'static str },

    /// Neither a current-state nor a historized target is configured
    #[error("Entity '{0}' has no target table (set current_table and/or history_table)")]
    NoTarget(String),

    /// A target was requested that the entity does not configure
    #[error("Entity '{entity}' has no {target} target table")]
    TargetNotConfigured { entity: String, target: Target },

    /// Name is not a plain SQL identifier
    #[error("Invalid identifier '{0}'")]
    InvalidIdentifier(String),

    /// The same column is used for two roles
    #[error("Column '{column}' is used more than once in entity '{entity}'")]
    DuplicateColumn { entity: String, column: String },

    /// The same table is used for two roles (e.g. source and staging)
    #[error("Table '{table}' is used more than once in entity '{entity}'")]
    DuplicateTable { entity: String, table: String },
}

// ============================================================================
// Targets
// ============================================================================

/// Target write strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Non-historized current-state projection (upsert).
    Current,
    /// Historized projection with SCD Type 2 versions.
    History,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Current => "current",
            Target::History => "history",
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// EntityConfig
// ============================================================================

fn default_created_column() -> String {
    "created_date".to_string()
}

fn default_modified_column() -> String {
    "modified_date".to_string()
}

fn default_start_column() -> String {
    "start_date".to_string()
}

fn default_end_column() -> String {
    "end_date".to_string()
}

/// Description of a single tracked entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityConfig {
    /// Entity identifier, also the watermark key
    pub entity: String,

    /// Mutable system of record
    pub source_table: String,

    /// Staging relation, replaced every cycle
    pub staging_table: String,

    /// Current-state target (optional)
    #[serde(default)]
    pub current_table: Option<String>,

    /// Historized target (optional)
    #[serde(default)]
    pub history_table: Option<String>,

    /// Business key columns
    pub key_columns: Vec<String>,

    /// Tracked attribute columns
    pub tracked_columns: Vec<String>,

    /// Source/staging creation timestamp column
    #[serde(default = "default_created_column")]
    pub created_column: String,

    /// Source/staging last-modified timestamp column
    #[serde(default = "default_modified_column")]
    pub modified_column: String,

    /// Validity start column (staging and historized target)
    #[serde(default = "default_start_column")]
    pub start_column: String,

    /// Validity end column (staging and historized target)
    #[serde(default = "default_end_column")]
    pub end_column: String,
}

impl EntityConfig {
    /// Create a config with default timestamp column names and no targets.
    pub fn new(
        entity: impl Into<String>,
        source_table: impl Into<String>,
        staging_table: impl Into<String>,
        key_columns: Vec<String>,
        tracked_columns: Vec<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            source_table: source_table.into(),
            staging_table: staging_table.into(),
            current_table: None,
            history_table: None,
            key_columns,
            tracked_columns,
            created_column: default_created_column(),
            modified_column: default_modified_column(),
            start_column: default_start_column(),
            end_column: default_end_column(),
        }
    }

    /// Set the current-state target table.
    pub fn with_current_table(mut self, table: impl Into<String>) -> Self {
        self.current_table = Some(table.into());
        self
    }

    /// Set the historized target table.
    pub fn with_history_table(mut self, table: impl Into<String>) -> Self {
        self.history_table = Some(table.into());
        self
    }

    /// Load and validate a config file. The format is chosen by extension
    /// (`.yaml`/`.yml`, `.toml`, `.json`).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let config: Self = match extension.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            "toml" => toml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a YAML config.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Targets configured for this entity, current-state first.
    pub fn targets(&self) -> Vec<Target> {
        let mut targets = Vec::new();
        if self.current_table.is_some() {
            targets.push(Target::Current);
        }
        if self.history_table.is_some() {
            targets.push(Target::History);
        }
        targets
    }

    /// Table backing a target, if configured.
    pub fn target_table(&self, target: Target) -> Option<&str> {
        match target {
            Target::Current => self.current_table.as_deref(),
            Target::History => self.history_table.as_deref(),
        }
    }

    /// Resolve the targets a cycle writes: every configured target when
    /// `requested` is `None`, otherwise the requested ones, which must all
    /// be configured.
    pub fn select_targets(&self, requested: Option<&[Target]>) -> Result<Vec<Target>, ConfigError> {
        let Some(requested) = requested else {
            return Ok(self.targets());
        };
        let mut selected = Vec::new();
        for &target in requested {
            if self.target_table(target).is_none() {
                return Err(ConfigError::TargetNotConfigured {
                    entity: self.entity.clone(),
                    target,
                });
            }
            if !selected.contains(&target) {
                selected.push(target);
            }
        }
        if selected.is_empty() {
            return Err(ConfigError::NoTarget(self.entity.clone()));
        }
        Ok(selected)
    }

    /// Check that the config describes a usable entity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entity.trim().is_empty() {
            return Err(ConfigError::InvalidIdentifier(self.entity.clone()));
        }
        if self.key_columns.is_empty() {
            return Err(ConfigError::MissingColumns {
                entity: self.entity.clone(),
                what: "key",
            });
        }
        if self.tracked_columns.is_empty() {
            return Err(ConfigError::MissingColumns {
                entity: self.entity.clone(),
                what: "tracked",
            });
        }
        if self.targets().is_empty() {
            return Err(ConfigError::NoTarget(self.entity.clone()));
        }

        let tables = [
            Some(&self.source_table),
            Some(&self.staging_table),
            self.current_table.as_ref(),
            self.history_table.as_ref(),
        ];
        let mut seen_tables = HashSet::new();
        for table in tables.into_iter().flatten() {
            if !is_valid_table_name(table) {
                return Err(ConfigError::InvalidIdentifier(table.clone()));
            }
            // Staging is cleared every cycle, so it must never alias another relation
            if !seen_tables.insert(table.as_str()) {
                return Err(ConfigError::DuplicateTable {
                    entity: self.entity.clone(),
                    table: table.clone(),
                });
            }
        }

        let mut seen = HashSet::new();
        for column in self.all_columns() {
            if !is_valid_identifier(column) {
                return Err(ConfigError::InvalidIdentifier(column.to_string()));
            }
            if !seen.insert(column) {
                return Err(ConfigError::DuplicateColumn {
                    entity: self.entity.clone(),
                    column: column.to_string(),
                });
            }
        }
        Ok(())
    }

    fn all_columns(&self) -> impl Iterator<Item = &str> {
        self.key_columns
            .iter()
            .chain(self.tracked_columns.iter())
            .chain([
                &self.created_column,
                &self.modified_column,
                &self.start_column,
                &self.end_column,
            ])
            .map(String::as_str)
    }
}

/// Plain SQL identifier: a letter or underscore followed by letters,
/// digits or underscores.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Table name, optionally schema-qualified (`schema.table`).
pub fn is_valid_table_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2 && parts.iter().all(|part| is_valid_identifier(part))
}
