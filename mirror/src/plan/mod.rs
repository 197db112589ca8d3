//! Table plan resolution.
//!
//! A table plan is the deduplicated list of [`TableLoadSpec`]s derived from the configured
//! sync plans. It is resolved once per manager and narrowed per run by a [`TableSelection`].

mod resolver;
mod spec;

pub use resolver::{TableSelection, resolve_table_plan, select_tables};
pub use spec::TableLoadSpec;
