//! Concurrency utilities for coordinating sync runs.

pub mod stop;
