//! Incremental sync of relational, columnar and search-index sources into an analytical
//! warehouse.
//!
//! For every [`types::SourceObject`] the [`pipeline::Pipeline`] derives the watermark already
//! applied to the destination, builds a filter selecting strictly newer records, pages through
//! them with adaptive page sizing, normalizes them and appends them to a destination table whose
//! schema grows as new fields show up.
//!
//! Sources and destinations are abstracted by the [`source::Source`] and
//! [`destination::Destination`] traits; in-memory implementations of both live in this crate,
//! driver-backed ones in `etl-connectors`.

pub mod connector;
pub mod conversions;
pub mod destination;
pub mod error;
pub mod extract;
pub mod filter;
pub mod load;
mod macros;
pub mod metrics;
pub mod pipeline;
pub mod routing;
pub mod schema;
pub mod source;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transform;
pub mod types;
pub mod watermark;
