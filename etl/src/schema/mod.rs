//! Destination schema reconciliation.
//!
//! Destination tables are created from the first batch loaded into them, or copied from the
//! source's own definition for columnar objects, and only ever grow: columns are added as they
//! appear in source data, never removed or retyped. Values that conflict with an existing column
//! are coerced to their type.

mod coerce;
mod reconcile;

pub use coerce::{align_batch, coerce_cell};
pub use reconcile::{
    SchemaChanges, TableTarget, copy_source_table, detect_key_columns, ensure_schema,
    infer_definition,
};
