//! Destination abstractions synced data is written to.
//!
//! This module provides the core [`Destination`] trait and an in-memory implementation.
//! Driver-backed destinations live in the `etl-connectors` crate.

mod base;
pub mod memory;

pub use base::Destination;
