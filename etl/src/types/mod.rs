//! Core data types shared by every stage of a sync run.
//!
//! Covers the values pulled from sources ([`Cell`], [`TableRow`], [`Batch`]), the destination
//! schema model ([`ColumnType`], [`TableSchema`], [`TableDefinition`]) and the per-object inputs
//! ([`SourceObject`], [`Watermark`]).

mod batch;
mod cell;
mod column;
mod object;
mod table_row;
mod watermark;

pub use batch::*;
pub use cell::*;
pub use column::*;
pub use object::*;
pub use table_row::*;
pub use watermark::*;
