//! Test doubles for the sync core.
//!
//! Available to unit tests and, with the `test-utils` feature, to integration tests and other
//! crates of the workspace.

pub mod action;
pub mod config;
pub mod connection;
pub mod handler;
pub mod registry;
