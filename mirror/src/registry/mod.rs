//! Durable per-table sync state.

mod base;
pub mod memory;

pub use base::{Registry, TableSyncState};
