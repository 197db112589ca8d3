use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::load::Config;
use crate::shared::{PgConnectionConfig, SentryConfig, SyncPlanConfig, ValidationError};

/// The kind of work a load action performs on a table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadActionKind {
    /// Full reload of the table.
    Batch,
    /// Rows changed since the last recorded watermark.
    #[default]
    Incremental,
    /// Rows inside the recent time window.
    RefreshRecent,
}

impl LoadActionKind {
    pub fn as_static_str(&self) -> &'static str {
        match self {
            LoadActionKind::Batch => "batch",
            LoadActionKind::Incremental => "incremental",
            LoadActionKind::RefreshRecent => "refresh_recent",
        }
    }
}

impl fmt::Display for LoadActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_static_str())
    }
}

impl FromStr for LoadActionKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "batch" => Ok(LoadActionKind::Batch),
            "incremental" => Ok(LoadActionKind::Incremental),
            "refresh_recent" => Ok(LoadActionKind::RefreshRecent),
            other => Err(ValidationError::InvalidFieldValue {
                field: "load action kind".to_string(),
                constraint: format!("`{other}` is not one of batch, incremental, refresh_recent"),
            }),
        }
    }
}

/// Tuning of the Postgres load actions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoadConfig {
    /// Maximum number of rows written with a single insert statement.
    #[serde(default = "LoadConfig::default_max_batch_size")]
    pub max_batch_size: usize,
    /// Width of the window reloaded by refresh-recent actions.
    #[serde(default = "LoadConfig::default_recent_window_hours")]
    pub recent_window_hours: u32,
    /// Maximum number of pooled connections per database.
    #[serde(default = "LoadConfig::default_max_pool_connections")]
    pub max_pool_connections: u32,
}

impl LoadConfig {
    pub const DEFAULT_MAX_BATCH_SIZE: usize = 10_000;
    pub const DEFAULT_RECENT_WINDOW_HOURS: u32 = 24;
    pub const DEFAULT_MAX_POOL_CONNECTIONS: u32 = 4;

    fn default_max_batch_size() -> usize {
        Self::DEFAULT_MAX_BATCH_SIZE
    }

    fn default_recent_window_hours() -> u32 {
        Self::DEFAULT_RECENT_WINDOW_HOURS
    }

    fn default_max_pool_connections() -> u32 {
        Self::DEFAULT_MAX_POOL_CONNECTIONS
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_batch_size == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "load.max_batch_size".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.recent_window_hours == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "load.recent_window_hours".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.max_pool_connections == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "load.max_pool_connections".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            max_batch_size: Self::DEFAULT_MAX_BATCH_SIZE,
            recent_window_hours: Self::DEFAULT_RECENT_WINDOW_HOURS,
            max_pool_connections: Self::DEFAULT_MAX_POOL_CONNECTIONS,
        }
    }
}

/// Top level configuration of a sync deployment.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Database every table is mirrored into. Also holds the registry.
    pub target: PgConnectionConfig,
    /// Source databases by name.
    pub sources: BTreeMap<String, PgConnectionConfig>,
    /// Sync plans, in priority order.
    pub plans: Vec<SyncPlanConfig>,
    /// Tables kept in the registry even though no plan lists them.
    #[serde(default)]
    pub extra_tables: Vec<String>,
    /// Action kind run by every incremental cycle.
    #[serde(default)]
    pub incremental_action: LoadActionKind,
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub sentry: Option<SentryConfig>,
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.target.validate()?;
        for source in self.sources.values() {
            source.validate()?;
        }

        for plan in &self.plans {
            if !self.sources.contains_key(&plan.source) {
                return Err(ValidationError::UnknownPlanSource(plan.source.clone()));
            }
            plan.validate()?;
        }

        self.load.validate()
    }
}

impl Config for SyncConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["extra_tables"];
}
