use std::sync::Arc;
use std::time::Duration;

use mirror::connection::{Connection, ConnectionFactory, ConnectionRole};
use mirror::error::SyncResult;
use mirror_config::shared::{
    IntoConnectOptions, LoadConfig, MIRROR_SOURCE_OPTIONS, MIRROR_TARGET_OPTIONS,
    PgConnectionConfig,
};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, info};

use crate::catalog;

/// Duration after which idle pooled connections are closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// A named, lazily connected pool to one database.
#[derive(Debug, Clone)]
pub struct PgConnection {
    name: Arc<str>,
    role: ConnectionRole,
    pool: PgPool,
}

impl PgConnection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Connection for PgConnection {
    async fn list_tables(&self, schema: &str) -> SyncResult<Vec<String>> {
        catalog::list_tables(&self.pool, schema).await
    }

    async fn disconnect(&self) {
        self.pool.close().await;
        debug!(connection = %self.name, role = %self.role, "connection pool closed");
    }
}

/// Creates [`PgConnection`]s.
///
/// Pools connect on first use, so unreachable databases surface as errors of the first query
/// rather than of [`ConnectionFactory::create`]. Source sessions are read-only.
#[derive(Debug, Clone)]
pub struct PgConnectionFactory {
    max_connections: u32,
}

impl PgConnectionFactory {
    pub fn new(config: &LoadConfig) -> Self {
        Self {
            max_connections: config.max_pool_connections,
        }
    }
}

impl ConnectionFactory for PgConnectionFactory {
    type Connection = PgConnection;

    fn create(
        &self,
        name: &str,
        config: &PgConnectionConfig,
        role: ConnectionRole,
    ) -> SyncResult<PgConnection> {
        let session_options = match role {
            ConnectionRole::Source => &*MIRROR_SOURCE_OPTIONS,
            ConnectionRole::Target => &*MIRROR_TARGET_OPTIONS,
        };

        let pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(self.max_connections)
            .idle_timeout(Some(IDLE_TIMEOUT))
            .connect_lazy_with(config.with_db(Some(session_options)));

        info!(
            connection = name,
            %role,
            host = %config.host,
            database = %config.name,
            "created connection pool"
        );

        Ok(PgConnection {
            name: Arc::from(name),
            role,
            pool,
        })
    }
}
