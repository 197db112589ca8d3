//! Database connection abstractions.
//!
//! The core never talks to a database itself. It obtains [`Connection`]s from a
//! [`ConnectionFactory`], keeps them in a [`ConnectionCache`] for the lifetime of a run and
//! hands them to load actions.

mod base;
mod cache;

pub use base::{Connection, ConnectionFactory, ConnectionRole};
pub use cache::ConnectionCache;
