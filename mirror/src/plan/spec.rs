use mirror_config::shared::{RefreshRecent, TableConfig, TableDefaults};

/// How one table is synchronized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLoadSpec {
    /// Table name, unique within a resolved plan.
    pub table_name: String,
    /// Name of the source the table is read from.
    pub source: String,
    /// Whether batch runs reload the table.
    pub batch_load: bool,
    /// Whether, and on which column, refresh-recent runs reload the table.
    pub refresh_recent: RefreshRecent,
    /// Column bounding incremental extraction.
    pub watermark_column: String,
}

impl TableLoadSpec {
    /// Builds the spec of an explicitly configured table, filling unset fields from `defaults`.
    pub fn from_config(source: &str, table: &TableConfig, defaults: &TableDefaults) -> Self {
        Self {
            table_name: table.name.clone(),
            source: source.to_string(),
            batch_load: table.batch_load.unwrap_or(defaults.batch_load),
            refresh_recent: table
                .refresh_recent
                .clone()
                .unwrap_or_else(|| defaults.refresh_recent.clone()),
            watermark_column: table
                .watermark_column
                .clone()
                .unwrap_or_else(|| defaults.watermark_column.clone()),
        }
    }

    /// Builds the spec of a discovered table from `defaults` alone.
    pub fn with_defaults(source: &str, table_name: String, defaults: &TableDefaults) -> Self {
        Self {
            table_name,
            source: source.to_string(),
            batch_load: defaults.batch_load,
            refresh_recent: defaults.refresh_recent.clone(),
            watermark_column: defaults.watermark_column.clone(),
        }
    }

    /// Column bounding the recent window, when refresh-recent names one explicitly.
    pub fn aux_timestamp_column(&self) -> Option<&str> {
        self.refresh_recent.column()
    }

    /// Column a refresh-recent run filters on.
    pub fn recent_window_column(&self) -> &str {
        self.aux_timestamp_column()
            .unwrap_or(self.watermark_column.as_str())
    }
}
