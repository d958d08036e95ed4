use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::connector::DestinationConnector;
use crate::destination::Destination;
use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::types::{BatchColumn, Cell, ColumnSchema, TableDefinition, TableRow, TableSchema};

#[derive(Debug, Default)]
struct Faults {
    /// Columns whose addition fails with a non-race error.
    rejected_columns: HashSet<String>,
    /// Columns a concurrent writer adds right before this wrapper does.
    racing_columns: HashSet<String>,
    /// Columns whose addition reports "already exists" although nothing added them.
    falsely_existing_columns: HashSet<String>,
    /// A concurrent writer creates every table right before this wrapper does.
    race_table_creation: bool,
    /// Number of upcoming appends that fail.
    failing_appends: u32,
    fail_lookups: bool,
    fail_compaction: bool,
    unreachable: bool,
}

#[derive(Debug, Default)]
struct Inner {
    faults: Faults,
    created_tables: Vec<TableDefinition>,
    added_columns: Vec<(String, ColumnSchema)>,
    append_calls: u64,
    compacted_tables: Vec<String>,
    shutdown_calls: u64,
    connections: u64,
}

/// Test wrapper for [`Destination`] implementations that tracks DDL and write operations.
///
/// [`TestDestinationWrapper`] wraps any destination implementation, records the calls the
/// pipeline makes through it and can simulate refused or racing DDL, failing appends and
/// failing probes. The wrapped destination still receives every successful call, so its
/// contents can be asserted on as usual.
#[derive(Debug, Clone)]
pub struct TestDestinationWrapper<D> {
    wrapped: D,
    inner: Arc<Mutex<Inner>>,
}

impl<D> TestDestinationWrapper<D> {
    /// Creates a new test wrapper around any destination implementation.
    pub fn wrap(destination: D) -> Self {
        Self {
            wrapped: destination,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Returns the wrapped destination.
    pub fn wrapped(&self) -> &D {
        &self.wrapped
    }

    /// Makes adding `column` fail with a non-race error.
    pub async fn reject_column(&self, column: &str) {
        let mut inner = self.inner.lock().await;
        inner.faults.rejected_columns.insert(column.to_owned());
    }

    /// Simulates a concurrent writer adding `column` first.
    pub async fn race_column(&self, column: &str) {
        let mut inner = self.inner.lock().await;
        inner.faults.racing_columns.insert(column.to_owned());
    }

    /// Makes adding `column` report that it already exists without adding it.
    pub async fn misreport_column_as_existing(&self, column: &str) {
        let mut inner = self.inner.lock().await;
        inner.faults.falsely_existing_columns.insert(column.to_owned());
    }

    /// Simulates a concurrent writer creating every table first.
    pub async fn race_table_creation(&self) {
        let mut inner = self.inner.lock().await;
        inner.faults.race_table_creation = true;
    }

    /// Makes the next `times` appends fail.
    pub async fn fail_appends(&self, times: u32) {
        let mut inner = self.inner.lock().await;
        inner.faults.failing_appends = times;
    }

    /// Makes existence, row-count and max probes fail.
    pub async fn fail_lookups(&self) {
        let mut inner = self.inner.lock().await;
        inner.faults.fail_lookups = true;
    }

    pub async fn fail_compaction(&self) {
        let mut inner = self.inner.lock().await;
        inner.faults.fail_compaction = true;
    }

    /// Makes every new connection fail.
    pub async fn make_unreachable(&self) {
        let mut inner = self.inner.lock().await;
        inner.faults.unreachable = true;
    }

    /// Returns the definitions of the tables this wrapper created.
    pub async fn created_tables(&self) -> Vec<TableDefinition> {
        self.inner.lock().await.created_tables.clone()
    }

    /// Returns the columns this wrapper added, with their table.
    pub async fn added_columns(&self) -> Vec<(String, ColumnSchema)> {
        self.inner.lock().await.added_columns.clone()
    }

    pub async fn append_calls(&self) -> u64 {
        self.inner.lock().await.append_calls
    }

    pub async fn compacted_tables(&self) -> Vec<String> {
        self.inner.lock().await.compacted_tables.clone()
    }

    pub async fn shutdown_calls(&self) -> u64 {
        self.inner.lock().await.shutdown_calls
    }

    pub async fn connections(&self) -> u64 {
        self.inner.lock().await.connections
    }

    async fn check_lookup(&self) -> EtlResult<()> {
        if self.inner.lock().await.faults.fail_lookups {
            return Err(injected(ErrorKind::DestinationQueryFailed, "Lookup was set up to fail"));
        }

        Ok(())
    }
}

fn injected(kind: ErrorKind, detail: &'static str) -> crate::error::EtlError {
    etl_error!(kind, "Injected destination failure", detail)
}

impl<D> Destination for TestDestinationWrapper<D>
where
    D: Destination + Send + Sync,
{
    fn name() -> &'static str {
        D::name()
    }

    async fn shutdown(&self) -> EtlResult<()> {
        self.inner.lock().await.shutdown_calls += 1;
        self.wrapped.shutdown().await
    }

    async fn table_exists(&self, table: &str) -> EtlResult<bool> {
        self.check_lookup().await?;
        self.wrapped.table_exists(table).await
    }

    async fn row_count(&self, table: &str) -> EtlResult<u64> {
        self.check_lookup().await?;
        self.wrapped.row_count(table).await
    }

    async fn max_value(&self, table: &str, column: &str) -> EtlResult<Option<Cell>> {
        self.check_lookup().await?;
        self.wrapped.max_value(table, column).await
    }

    async fn table_schema(&self, table: &str) -> EtlResult<Option<TableSchema>> {
        self.wrapped.table_schema(table).await
    }

    async fn create_table(&self, definition: &TableDefinition) -> EtlResult<()> {
        let race = self.inner.lock().await.faults.race_table_creation;
        if race {
            self.wrapped.create_table(definition).await?;
            return Err(injected(
                ErrorKind::DestinationTableAlreadyExists,
                "A concurrent writer created the table first",
            ));
        }

        self.wrapped.create_table(definition).await?;
        self.inner
            .lock()
            .await
            .created_tables
            .push(definition.clone());

        Ok(())
    }

    async fn create_table_from_statement(&self, table: &str, statement: &str) -> EtlResult<bool> {
        self.wrapped
            .create_table_from_statement(table, statement)
            .await
    }

    async fn add_column(&self, table: &str, column: &ColumnSchema) -> EtlResult<()> {
        let (rejected, racing, misreported) = {
            let inner = self.inner.lock().await;
            (
                inner.faults.rejected_columns.contains(&column.name),
                inner.faults.racing_columns.contains(&column.name),
                inner.faults.falsely_existing_columns.contains(&column.name),
            )
        };

        if rejected {
            return Err(injected(
                ErrorKind::DestinationQueryFailed,
                "The column type was refused",
            ));
        }

        if misreported {
            return Err(injected(
                ErrorKind::DestinationColumnAlreadyExists,
                "The column was reported as existing but was never added",
            ));
        }

        if racing {
            self.wrapped.add_column(table, column).await?;
            return Err(injected(
                ErrorKind::DestinationColumnAlreadyExists,
                "A concurrent writer added the column first",
            ));
        }

        self.wrapped.add_column(table, column).await?;
        self.inner
            .lock()
            .await
            .added_columns
            .push((table.to_owned(), column.clone()));

        Ok(())
    }

    async fn append_rows(
        &self,
        table: &str,
        columns: &[BatchColumn],
        rows: Vec<TableRow>,
    ) -> EtlResult<()> {
        let fail = {
            let mut inner = self.inner.lock().await;
            inner.append_calls += 1;
            if inner.faults.failing_appends > 0 {
                inner.faults.failing_appends -= 1;
                true
            } else {
                false
            }
        };

        if fail {
            return Err(injected(ErrorKind::LoadFailed, "Append was set up to fail"));
        }

        self.wrapped.append_rows(table, columns, rows).await
    }

    async fn compact(&self, table: &str) -> EtlResult<()> {
        let fail = {
            let mut inner = self.inner.lock().await;
            inner.compacted_tables.push(table.to_owned());
            inner.faults.fail_compaction
        };

        if fail {
            return Err(injected(ErrorKind::CompactionFailed, "Compaction was set up to fail"));
        }

        self.wrapped.compact(table).await
    }
}

impl<D> DestinationConnector for TestDestinationWrapper<D>
where
    D: Destination + Clone + Send + Sync,
{
    type Destination = TestDestinationWrapper<D>;

    async fn connect(&self) -> EtlResult<Self::Destination> {
        let mut inner = self.inner.lock().await;
        if inner.faults.unreachable {
            return Err(injected(
                ErrorKind::DestinationConnectionFailed,
                "Destination was set up to be unreachable",
            ));
        }
        inner.connections += 1;

        Ok(self.clone())
    }
}
