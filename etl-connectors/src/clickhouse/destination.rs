use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use etl::destination::Destination;
use etl::error::{ErrorKind, EtlResult};
use etl::etl_error;
use etl::filter::quote_identifier;
use etl::types::{BatchColumn, Cell, ColumnSchema, TableDefinition, TableRow, TableSchema};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::clickhouse::client::ClickHouseClient;
use crate::clickhouse::metrics::{
    ETL_CH_COMPACTION_DURATION_SECONDS, ETL_CH_DDL_DURATION_SECONDS, register_metrics,
};
use crate::clickhouse::schema::{
    ClickHouseType, build_add_column_sql, build_create_table_sql, rewrite_create_statement,
};

/// Column names and types of a table, in declaration order.
type TableLayout = Arc<[(String, ClickHouseType)]>;

/// ClickHouse destination writing synced objects into MergeTree tables.
///
/// Rows are encoded as RowBinary against the column types the server reports for the table, so
/// the encoder always matches the table as it currently exists, including columns added by other
/// jobs. Deduplicating tables use `ReplacingMergeTree` and are compacted with
/// `OPTIMIZE TABLE ... FINAL`.
///
/// The struct is cheaply cloneable: `client` wraps an `Arc` internally, and `layouts` is
/// wrapped in `Arc<RwLock<…>>`.
#[derive(Clone)]
pub struct ClickHouseDestination {
    client: ClickHouseClient,
    max_bytes_per_insert: u64,
    /// Cache: table name → layout. Entries are dropped whenever this destination changes the
    /// table, and refetched when a batch names a column the cached layout lacks.
    layouts: Arc<RwLock<HashMap<String, TableLayout>>>,
}

impl ClickHouseDestination {
    pub fn new(client: ClickHouseClient, max_bytes_per_insert: u64) -> Self {
        register_metrics();
        Self {
            client,
            max_bytes_per_insert,
            layouts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn layout(&self, table: &str, refresh: bool) -> EtlResult<TableLayout> {
        if !refresh {
            if let Some(layout) = self.layouts.read().await.get(table) {
                return Ok(Arc::clone(layout));
            }
        }

        let columns = self
            .client
            .table_columns(table, ErrorKind::DestinationQueryFailed)
            .await?;
        if columns.is_empty() {
            return Err(etl_error!(
                ErrorKind::DestinationTableMissing,
                "Destination table not found",
                format!("Table '{table}' does not exist")
            ));
        }

        let layout: TableLayout = columns.into();
        self.layouts
            .write()
            .await
            .insert(table.to_owned(), Arc::clone(&layout));

        Ok(layout)
    }

    async fn invalidate(&self, table: &str) {
        self.layouts.write().await.remove(table);
    }

    async fn run_ddl(&self, table: &str, sql: &str, description: &'static str) -> EtlResult<()> {
        let ddl_start = Instant::now();
        let result = self
            .client
            .execute(sql, ErrorKind::DestinationQueryFailed, description)
            .await;
        metrics::histogram!(ETL_CH_DDL_DURATION_SECONDS, "table" => table.to_owned())
            .record(ddl_start.elapsed().as_secs_f64());

        // A lost race still changed the table under us.
        self.invalidate(table).await;

        result
    }
}

/// Positions of the batch columns inside a table layout.
///
/// Returns `None` when the layout lacks one of the columns.
fn resolve_columns(
    layout: &[(String, ClickHouseType)],
    columns: &[BatchColumn],
) -> Option<Vec<usize>> {
    columns
        .iter()
        .map(|column| layout.iter().position(|(name, _)| *name == column.name))
        .collect()
}

impl Destination for ClickHouseDestination {
    fn name() -> &'static str {
        "clickhouse"
    }

    async fn table_exists(&self, table: &str) -> EtlResult<bool> {
        self.client.table_exists(table).await
    }

    async fn row_count(&self, table: &str) -> EtlResult<u64> {
        let sql = format!("SELECT count() FROM {}", quote_identifier(table));
        self.client
            .fetch_count(&sql, ErrorKind::DestinationQueryFailed)
            .await
    }

    async fn max_value(&self, table: &str, column: &str) -> EtlResult<Option<Cell>> {
        let value = self.client.max_as_text(table, column).await?;
        Ok(value.map(Cell::String))
    }

    async fn table_schema(&self, table: &str) -> EtlResult<Option<TableSchema>> {
        let columns = self
            .client
            .table_columns(table, ErrorKind::DestinationQueryFailed)
            .await?;
        if columns.is_empty() {
            return Ok(None);
        }

        let columns = columns
            .into_iter()
            .map(|(name, typ)| ColumnSchema::new(name, typ.column_type(), typ.is_nullable()))
            .collect();

        Ok(Some(TableSchema {
            name: table.to_owned(),
            columns,
        }))
    }

    async fn create_table(&self, definition: &TableDefinition) -> EtlResult<()> {
        let sql = build_create_table_sql(definition);
        self.run_ddl(&definition.name, &sql, "ClickHouse CREATE TABLE failed")
            .await?;
        info!(table = %definition.name, engine = ?definition.engine, "created clickhouse table");

        Ok(())
    }

    async fn create_table_from_statement(&self, table: &str, statement: &str) -> EtlResult<bool> {
        let Some(sql) = rewrite_create_statement(statement, table) else {
            return Err(etl_error!(
                ErrorKind::SchemaReconciliationFailed,
                "Unsupported source table statement",
                format!("Cannot create table '{table}' from `{statement}`")
            ));
        };

        self.run_ddl(table, &sql, "ClickHouse CREATE TABLE failed")
            .await?;
        info!(table, "created clickhouse table from the source definition");

        Ok(true)
    }

    async fn add_column(&self, table: &str, column: &ColumnSchema) -> EtlResult<()> {
        let sql = build_add_column_sql(table, column);
        self.run_ddl(table, &sql, "ClickHouse ALTER TABLE failed")
            .await?;
        info!(table, column = %column.name, "added clickhouse column");

        Ok(())
    }

    async fn append_rows(
        &self,
        table: &str,
        columns: &[BatchColumn],
        rows: Vec<TableRow>,
    ) -> EtlResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut layout = self.layout(table, false).await?;
        let mut positions = resolve_columns(&layout, columns);
        if positions.is_none() {
            layout = self.layout(table, true).await?;
            positions = resolve_columns(&layout, columns);
        }
        let Some(positions) = positions else {
            return Err(etl_error!(
                ErrorKind::DestinationTableMissing,
                "Destination column not found",
                format!("Table '{table}' lacks columns of the batch")
            ));
        };

        // Columns whose type cannot be encoded keep their server-side default.
        let mut kept = Vec::with_capacity(columns.len());
        for (index, position) in positions.into_iter().enumerate() {
            let (name, typ) = &layout[position];
            if typ.is_supported() {
                kept.push((index, position));
            } else {
                warn!(table, column = %name, ?typ, "skipping column with unsupported type");
            }
        }

        let names: Vec<String> = kept
            .iter()
            .map(|&(_, position)| layout[position].0.clone())
            .collect();
        let types: Vec<ClickHouseType> = kept
            .iter()
            .map(|&(_, position)| layout[position].1.clone())
            .collect();

        let row_count = rows.len();
        let encoded_rows: Vec<Vec<Cell>> = rows
            .into_iter()
            .map(|row| {
                let mut values = row.into_values();
                kept.iter()
                    .map(|&(index, _)| {
                        values
                            .get_mut(index)
                            .map(|value| std::mem::replace(value, Cell::Null))
                            .unwrap_or(Cell::Null)
                    })
                    .collect()
            })
            .collect();

        self.client
            .insert_rows(table, &names, &types, encoded_rows, self.max_bytes_per_insert)
            .await?;
        debug!(table, rows = row_count, "inserted rows into clickhouse");

        Ok(())
    }

    async fn compact(&self, table: &str) -> EtlResult<()> {
        let sql = format!("OPTIMIZE TABLE {} FINAL", quote_identifier(table));
        let start = Instant::now();
        self.client
            .execute(&sql, ErrorKind::CompactionFailed, "ClickHouse compaction failed")
            .await?;
        metrics::histogram!(ETL_CH_COMPACTION_DURATION_SECONDS, "table" => table.to_owned())
            .record(start.elapsed().as_secs_f64());

        Ok(())
    }
}
