//! Configuration types shared by the mirror crates.

mod base;
mod connection;
mod plan;
mod sentry;
mod sync;

pub use base::ValidationError;
pub use connection::{
    IntoConnectOptions, MIRROR_REGISTRY_OPTIONS, MIRROR_SOURCE_OPTIONS, MIRROR_TARGET_OPTIONS,
    PgConnectionConfig, PgSessionOptions, TlsConfig,
};
pub use plan::{
    DEFAULT_WATERMARK_COLUMN, RefreshRecent, SyncPlanConfig, TableConfig, TableDefaults,
};
pub use sentry::SentryConfig;
pub use sync::{LoadActionKind, LoadConfig, SyncConfig};
