//! Telemetry setup shared by the sync crates.

pub mod tracing;
