//! The load action contract.
//!
//! A load action is the unit of work that synchronizes one table. Every action goes through
//! the same ordered [`LOAD_STAGES`], the [`crate::pipeline::Pipeline`] drives them.

mod base;

pub use base::{LOAD_STAGES, LoadAction, LoadActionFactory, LoadContext, LoadTask, Stage};
pub use mirror_config::shared::LoadActionKind;
