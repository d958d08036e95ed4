use std::future::Future;

use crate::error::EtlResult;
use crate::types::{BatchColumn, Cell, ColumnSchema, TableDefinition, TableRow, TableSchema};

/// Trait for warehouses synced data is written to.
///
/// [`Destination`] implementations expose the probes the watermark resolver needs, the DDL the
/// schema reconciler issues, and the append and compaction operations of the loader. The
/// destination is also the only place sync progress lives: there is no separate state store,
/// the watermark is always derived from the loaded data.
///
/// Implementations must classify "already exists" responses from [`Destination::create_table`]
/// and [`Destination::add_column`] as
/// [`crate::error::ErrorKind::DestinationTableAlreadyExists`] and
/// [`crate::error::ErrorKind::DestinationColumnAlreadyExists`], since concurrent jobs rely on
/// those kinds to treat lost DDL races as success.
///
/// The trait also provides an optional [`Destination::shutdown`] method with a default no-op
/// implementation.
pub trait Destination {
    /// Returns the name of the destination.
    fn name() -> &'static str;

    /// Releases the connection.
    ///
    /// The default implementation is a no-op.
    fn shutdown(&self) -> impl Future<Output = EtlResult<()>> + Send {
        async { Ok(()) }
    }

    /// Returns whether `table` exists.
    fn table_exists(&self, table: &str) -> impl Future<Output = EtlResult<bool>> + Send;

    /// Returns the number of rows in `table`.
    fn row_count(&self, table: &str) -> impl Future<Output = EtlResult<u64>> + Send;

    /// Returns the maximum value of `column` in `table`, or [`None`] when every value is null.
    fn max_value(
        &self,
        table: &str,
        column: &str,
    ) -> impl Future<Output = EtlResult<Option<Cell>>> + Send;

    /// Returns the current schema of `table`, or [`None`] when it does not exist.
    fn table_schema(
        &self,
        table: &str,
    ) -> impl Future<Output = EtlResult<Option<TableSchema>>> + Send;

    /// Creates a table.
    fn create_table(
        &self,
        definition: &TableDefinition,
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// Creates `table` from a `CREATE TABLE` statement read from a source of the same engine.
    ///
    /// Returns `false` when the destination cannot run such statements, which is what the
    /// default implementation does.
    fn create_table_from_statement(
        &self,
        table: &str,
        statement: &str,
    ) -> impl Future<Output = EtlResult<bool>> + Send {
        let _ = (table, statement);
        async { Ok(false) }
    }

    /// Adds a column to an existing table.
    fn add_column(
        &self,
        table: &str,
        column: &ColumnSchema,
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// Appends rows to `table`.
    ///
    /// `columns` names the column each row value belongs to. Every column is guaranteed to exist
    /// in the table; table columns absent from `columns` take their default.
    fn append_rows(
        &self,
        table: &str,
        columns: &[BatchColumn],
        rows: Vec<TableRow>,
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// Collapses rows sharing a sort key to their most recently inserted version.
    fn compact(&self, table: &str) -> impl Future<Output = EtlResult<()>> + Send;
}
