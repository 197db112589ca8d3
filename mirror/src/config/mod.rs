//! Configuration objects used by the sync core.

pub use mirror_config::shared::*;
