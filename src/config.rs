//! Weave ingestion settings
//!
//! Values recorded verbatim into every private-metadata set. Loaded from YAML
//! or from the environment and handed to `IngestionService::new`; nothing
//! here is global.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, WeaveError};

pub const DEFAULT_CONNECTION: &str = "portal_db";
pub const DEFAULT_SQL_SCHEMA: &str = "public";
pub const DEFAULT_SQL_TABLE: &str = "indicator_indicatordata";
pub const DEFAULT_IMPORT_METHOD: &str = "Portal Indicator";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaveConfig {
    /// Logical connection name the visualization client uses to reach the data.
    pub connection: String,
    /// Schema holding the source data table.
    pub sql_schema: String,
    /// Source data table.
    pub sql_table: String,
    /// Provenance label written as `importMethod`.
    pub import_method: String,
}

impl Default for WeaveConfig {
    fn default() -> Self {
        Self {
            connection: DEFAULT_CONNECTION.to_string(),
            sql_schema: DEFAULT_SQL_SCHEMA.to_string(),
            sql_table: DEFAULT_SQL_TABLE.to_string(),
            import_method: DEFAULT_IMPORT_METHOD.to_string(),
        }
    }
}

impl WeaveConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            WeaveError::InvalidInput(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Load configuration from a YAML string. Missing keys keep their defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| WeaveError::InvalidInput(format!("weave config: {}", e)))
    }

    /// Build from `WEAVE_*` environment variables, reading `.env` first if present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            connection: lookup("WEAVE_CONNECTION").unwrap_or(defaults.connection),
            sql_schema: lookup("WEAVE_SQL_SCHEMA").unwrap_or(defaults.sql_schema),
            sql_table: lookup("WEAVE_SQL_TABLE").unwrap_or(defaults.sql_table),
            import_method: lookup("WEAVE_IMPORT_METHOD").unwrap_or(defaults.import_method),
        }
    }

    pub fn with_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = connection.into();
        self
    }
}
