//! Engine configuration.
//!
//! Configuration is usually embedded in the host application's own settings; it can
//! also be read on its own from YAML with [`Configuration::from_yaml`].
use schemars::JsonSchema;
use schemars::schema::RootSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::error::ConfigurationError;
use crate::pagination::preprocess::DEFAULT_NUM_ENTITIES;
use crate::pagination::preprocess::PAGE_SIZE;

/// The configuration of the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Configuration {
    /// Automatic pagination.
    pub pagination: PaginationConfig,
}

/// Which pagination strategy drives paginated documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaginationStrategyKind {
    /// Nested cursors: every list field, at every depth, is fetched completely.
    #[default]
    Legacy,
    /// Only top level list fields are paginated, nested lists get a single page.
    Shallow,
    /// Pagination disabled: documents are sent once, as written.
    Skip,
}

/// Page sizing of automatic pagination.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PaginationConfig {
    /// Strategy used when the caller does not pick one.
    #[serde(default)]
    pub strategy: PaginationStrategyKind,

    /// Rows fetched for a list field without a `first` argument.
    #[serde(default = "default_first")]
    pub default_first: u64,

    /// Largest `first` sent in a single page.
    #[serde(default = "default_page_size")]
    pub page_size: u64,

    /// Largest offset (`skip`) a node may reach before it switches to cursor
    /// filtering. `0` switches to cursor filtering right after the first page.
    #[serde(default)]
    pub offset_ceiling: u64,
}

fn default_first() -> u64 {
    DEFAULT_NUM_ENTITIES
}

fn default_page_size() -> u64 {
    PAGE_SIZE
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            strategy: PaginationStrategyKind::default(),
            default_first: default_first(),
            page_size: default_page_size(),
            offset_ceiling: 0,
        }
    }
}

impl PaginationConfig {
    /// A page size of 0 would request empty pages forever.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.page_size == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "pagination.page_size",
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

impl Configuration {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigurationError> {
        let configuration: Configuration = serde_yaml::from_str(yaml)?;
        configuration.validate()?;
        Ok(configuration)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.pagination.validate()
    }

    /// JSON schema of the configuration, for editor support and documentation.
    pub fn json_schema() -> RootSchema {
        schemars::schema_for!(Configuration)
    }
}
