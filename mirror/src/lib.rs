//! Orchestration core of the mirror sync engine.
//!
//! The crate keeps a target database in sync with one or more source databases. It resolves
//! the configured sync plans into a table plan, builds one load action per table and drives
//! the actions through a [`pipeline::Pipeline`]. [`manager::SyncManager`] exposes the three
//! kinds of runs:
//!
//! - batch: full reload of the selected tables followed by a refresh of their recent rows;
//! - refresh-recent: reload of the rows inside the recent time window;
//! - incremental: endless loop loading rows changed since the last run.
//!
//! Database access goes through the [`connection`], [`actions`] and [`registry`] traits,
//! the `mirror-postgres` crate implements them for Postgres.

pub mod actions;
pub mod clock;
pub mod concurrency;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
mod macros;
pub mod manager;
pub mod metrics;
pub mod pipeline;
pub mod plan;
pub mod registry;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
