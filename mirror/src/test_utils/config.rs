use std::collections::BTreeMap;

use mirror_config::shared::{
    LoadActionKind, LoadConfig, PgConnectionConfig, SyncConfig, SyncPlanConfig, TableConfig,
    TableDefaults, TlsConfig,
};

use crate::connection::{ConnectionCache, ConnectionFactory};

/// Connection settings pointing at a local database named `name`.
pub fn connection_config(name: &str) -> PgConnectionConfig {
    PgConnectionConfig {
        host: "localhost".to_string(),
        port: 5432,
        name: name.to_string(),
        username: "postgres".to_string(),
        password: None,
        tls: TlsConfig::disabled(),
    }
}

/// A plan of `source` listing `tables` with default settings.
pub fn plan(source: &str, tables: &[&str]) -> SyncPlanConfig {
    SyncPlanConfig {
        source: source.to_string(),
        schema: None,
        tables: tables.iter().map(|table| TableConfig::named(*table)).collect(),
        defaults: TableDefaults::default(),
    }
}

/// A sync configuration with one source per distinct plan source.
pub fn sync_config(plans: Vec<SyncPlanConfig>) -> SyncConfig {
    let sources = plans
        .iter()
        .map(|plan| (plan.source.clone(), connection_config(&plan.source)))
        .collect();

    SyncConfig {
        target: connection_config("target"),
        sources,
        plans,
        extra_tables: Vec::new(),
        incremental_action: LoadActionKind::Incremental,
        load: LoadConfig::default(),
        sentry: None,
    }
}

/// A connection cache knowing the given sources.
pub fn connection_cache<F>(factory: F, sources: &[&str]) -> ConnectionCache<F>
where
    F: ConnectionFactory,
{
    let sources: BTreeMap<String, PgConnectionConfig> = sources
        .iter()
        .map(|source| (source.to_string(), connection_config(source)))
        .collect();

    ConnectionCache::new(factory, connection_config("target"), sources)
}
