//! Tracing and metrics setup shared by the mirror binaries and tests.

pub mod metrics;
pub mod tracing;
