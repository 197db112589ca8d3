use std::collections::{BTreeMap, HashMap};

use mirror_config::shared::PgConnectionConfig;
use tracing::{debug, info};

use crate::bail;
use crate::connection::{Connection, ConnectionFactory, ConnectionRole};
use crate::error::{ErrorKind, SyncResult};

/// Name under which the target connection is created.
const TARGET_CONNECTION_NAME: &str = "target";

/// Lazily created connections of one sync session.
///
/// Source connections are keyed by source name and may be invalidated at any time, they are
/// recreated on next use. The target connection lives until [`ConnectionCache::close_all`].
pub struct ConnectionCache<F: ConnectionFactory> {
    factory: F,
    target_config: PgConnectionConfig,
    source_configs: BTreeMap<String, PgConnectionConfig>,
    target: Option<F::Connection>,
    sources: HashMap<String, F::Connection>,
}

impl<F> ConnectionCache<F>
where
    F: ConnectionFactory,
{
    pub fn new(
        factory: F,
        target_config: PgConnectionConfig,
        source_configs: BTreeMap<String, PgConnectionConfig>,
    ) -> Self {
        Self {
            factory,
            target_config,
            source_configs,
            target: None,
            sources: HashMap::new(),
        }
    }

    /// Returns the connection of source `name`, creating it if needed.
    ///
    /// Fails with [`ErrorKind::ConfigError`] when no source with that name is configured.
    pub fn source(&mut self, name: &str) -> SyncResult<F::Connection> {
        if let Some(connection) = self.sources.get(name) {
            return Ok(connection.clone());
        }

        let Some(config) = self.source_configs.get(name) else {
            bail!(
                ErrorKind::ConfigError,
                "Unknown source",
                format!("no source named '{name}' is configured")
            );
        };

        debug!(source = name, "creating source connection");
        let connection = self.factory.create(name, config, ConnectionRole::Source)?;
        self.sources.insert(name.to_string(), connection.clone());

        Ok(connection)
    }

    /// Returns the target connection, creating it if needed.
    pub fn target(&mut self) -> SyncResult<F::Connection> {
        if let Some(connection) = &self.target {
            return Ok(connection.clone());
        }

        debug!("creating target connection");
        let connection = self.factory.create(
            TARGET_CONNECTION_NAME,
            &self.target_config,
            ConnectionRole::Target,
        )?;
        self.target = Some(connection.clone());

        Ok(connection)
    }

    /// Disconnects and drops every cached source connection.
    pub async fn invalidate_sources(&mut self) {
        for (name, connection) in self.sources.drain() {
            debug!(source = %name, "closing source connection");
            connection.disconnect().await;
        }
    }

    /// Disconnects and drops every cached connection, the target included.
    pub async fn close_all(&mut self) {
        self.invalidate_sources().await;

        if let Some(target) = self.target.take() {
            target.disconnect().await;
        }

        info!("all connections closed");
    }

    /// Number of cached source connections.
    pub fn cached_sources(&self) -> usize {
        self.sources.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::config::connection_cache;
    use crate::test_utils::connection::TestConnectionFactory;

    #[test]
    fn connections_are_created_once_and_reused() {
        let factory = TestConnectionFactory::new();
        let mut cache = connection_cache(factory.clone(), &["crm", "billing"]);

        cache.source("crm").unwrap();
        cache.source("crm").unwrap();
        cache.target().unwrap();
        cache.target().unwrap();

        assert_eq!(cache.cached_sources(), 1);
        assert_eq!(factory.created_count(ConnectionRole::Source), 1);
        assert_eq!(factory.created_count(ConnectionRole::Target), 1);
    }

    #[test]
    fn unknown_sources_are_configuration_errors() {
        let mut cache = connection_cache(TestConnectionFactory::new(), &["crm"]);

        let err = cache.source("warehouse").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConfigError);
        assert_eq!(cache.cached_sources(), 0);
    }

    #[tokio::test]
    async fn invalidating_sources_keeps_the_target() {
        let factory = TestConnectionFactory::new();
        let mut cache = connection_cache(factory.clone(), &["crm"]);
        let source = cache.source("crm").unwrap();
        let target = cache.target().unwrap();

        cache.invalidate_sources().await;

        assert!(source.is_disconnected());
        assert!(!target.is_disconnected());
        assert_eq!(cache.cached_sources(), 0);

        let renewed = cache.source("crm").unwrap();
        assert!(!renewed.is_disconnected());
        assert_eq!(factory.created_count(ConnectionRole::Source), 2);

        cache.close_all().await;
        assert!(target.is_disconnected());
        assert!(renewed.is_disconnected());
    }
}
