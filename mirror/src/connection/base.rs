use std::fmt;
use std::future::Future;

use mirror_config::shared::PgConnectionConfig;

use crate::error::SyncResult;

/// What a connection is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionRole {
    /// Read only access to a source database.
    Source,
    /// Read and write access to the target database.
    Target,
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionRole::Source => f.write_str("source"),
            ConnectionRole::Target => f.write_str("target"),
        }
    }
}

/// A handle to a database.
///
/// Clones share the underlying resources, so a connection can be handed to many load actions
/// running concurrently. Implementations must be safe for concurrent use.
pub trait Connection: Clone + Send + Sync + 'static {
    /// Returns the names of the base tables of `schema`, in a stable order.
    fn list_tables(&self, schema: &str) -> impl Future<Output = SyncResult<Vec<String>>> + Send;

    /// Closes the connection. Clones held elsewhere become unusable.
    fn disconnect(&self) -> impl Future<Output = ()> + Send;
}

/// Creates connections from configuration.
pub trait ConnectionFactory: Send + Sync {
    type Connection: Connection;

    /// Creates a connection named `name` for `role`.
    ///
    /// Implementations may connect lazily, in which case connectivity failures surface on first
    /// use.
    fn create(
        &self,
        name: &str,
        config: &PgConnectionConfig,
        role: ConnectionRole,
    ) -> SyncResult<Self::Connection>;
}
