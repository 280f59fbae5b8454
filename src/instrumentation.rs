//! Process instrumentation.
pub mod tracing;
