//! Source abstractions rows are extracted from.
//!
//! This module provides the [`Source`] trait and an in-memory implementation. Driver-backed
//! sources live in the `etl-connectors` crate.

mod base;
pub mod memory;

pub use base::{ScrollPage, Source};
