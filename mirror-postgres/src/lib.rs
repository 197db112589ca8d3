//! Postgres implementations of the mirror connection, registry and load action traits.

pub mod actions;
mod catalog;
pub mod connection;
pub mod registry;
pub mod sql;

pub use actions::{PgLoadAction, PgLoadActionFactory};
pub use connection::{PgConnection, PgConnectionFactory};
pub use registry::PostgresRegistry;
