use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Default column bounding incremental extraction.
pub const DEFAULT_WATERMARK_COLUMN: &str = "updated_at";

/// Whether, and on which column, a table takes part in refresh-recent runs.
///
/// Written in configuration files as `false`, `true` or the name of the timestamp column
/// bounding the recent window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawRefreshRecent", into = "RawRefreshRecent")]
pub enum RefreshRecent {
    #[default]
    Off,
    On,
    OnWithColumn(String),
}

impl RefreshRecent {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, RefreshRecent::Off)
    }

    /// Returns the column named by [`RefreshRecent::OnWithColumn`].
    pub fn column(&self) -> Option<&str> {
        match self {
            RefreshRecent::OnWithColumn(column) => Some(column),
            _ => None,
        }
    }

    /// Enables the refresh, keeping the column if one is already set.
    pub fn enabled(self) -> Self {
        match self {
            RefreshRecent::Off => RefreshRecent::On,
            other => other,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawRefreshRecent {
    Flag(bool),
    Column(String),
}

impl From<RawRefreshRecent> for RefreshRecent {
    fn from(value: RawRefreshRecent) -> Self {
        match value {
            RawRefreshRecent::Flag(false) => RefreshRecent::Off,
            RawRefreshRecent::Flag(true) => RefreshRecent::On,
            // Environment overrides arrive as strings.
            RawRefreshRecent::Column(column) => match column.trim() {
                "" | "false" => RefreshRecent::Off,
                "true" => RefreshRecent::On,
                name => RefreshRecent::OnWithColumn(name.to_string()),
            },
        }
    }
}

impl From<RefreshRecent> for RawRefreshRecent {
    fn from(value: RefreshRecent) -> Self {
        match value {
            RefreshRecent::Off => RawRefreshRecent::Flag(false),
            RefreshRecent::On => RawRefreshRecent::Flag(true),
            RefreshRecent::OnWithColumn(column) => RawRefreshRecent::Column(column),
        }
    }
}

/// Load settings of a single table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TableConfig {
    /// Table name, optionally schema qualified (`schema.table`).
    pub name: String,
    #[serde(default)]
    pub batch_load: Option<bool>,
    #[serde(default)]
    pub refresh_recent: Option<RefreshRecent>,
    #[serde(default)]
    pub watermark_column: Option<String>,
}

impl TableConfig {
    /// A table that only carries its name and inherits every setting from the plan defaults.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batch_load: None,
            refresh_recent: None,
            watermark_column: None,
        }
    }
}

/// Settings applied to tables of a plan that do not override them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TableDefaults {
    #[serde(default = "default_batch_load")]
    pub batch_load: bool,
    #[serde(default)]
    pub refresh_recent: RefreshRecent,
    #[serde(default = "default_watermark_column")]
    pub watermark_column: String,
}

impl Default for TableDefaults {
    fn default() -> Self {
        Self {
            batch_load: default_batch_load(),
            refresh_recent: RefreshRecent::Off,
            watermark_column: default_watermark_column(),
        }
    }
}

const fn default_batch_load() -> bool {
    true
}

fn default_watermark_column() -> String {
    DEFAULT_WATERMARK_COLUMN.to_string()
}

/// A sync plan: the tables mirrored from one source.
///
/// Tables are listed explicitly and, when `schema` is set, additionally discovered from that
/// schema of the source database. Explicitly listed tables keep their own settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SyncPlanConfig {
    /// Name of the source, a key of the configured sources.
    pub source: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
    #[serde(default)]
    pub defaults: TableDefaults,
}

impl SyncPlanConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.tables.is_empty() && self.schema.is_none() {
            return Err(ValidationError::EmptyPlan(self.source.clone()));
        }

        Ok(())
    }
}
