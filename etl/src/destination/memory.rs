use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::bail;
use crate::destination::Destination;
use crate::error::{ErrorKind, EtlResult};
use crate::types::{
    BatchColumn, Cell, ColumnSchema, TableDefinition, TableEngine, TableRow, TableSchema,
};

#[derive(Debug, Clone)]
struct MemoryTable {
    definition: TableDefinition,
    /// Rows aligned with `definition.columns`.
    rows: Vec<TableRow>,
    /// Statement the table was created from, for tables copied from a source definition.
    statement: Option<String>,
}

impl MemoryTable {
    fn column_index(&self, name: &str) -> Option<usize> {
        self.definition
            .columns
            .iter()
            .position(|column| column.name == name)
    }
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, MemoryTable>,
}

impl Inner {
    fn table(&self, table: &str) -> EtlResult<&MemoryTable> {
        match self.tables.get(table) {
            Some(table) => Ok(table),
            None => bail!(
                ErrorKind::DestinationTableMissing,
                "Destination table not found",
                format!("Table '{table}' does not exist")
            ),
        }
    }

    fn table_mut(&mut self, table: &str) -> EtlResult<&mut MemoryTable> {
        match self.tables.get_mut(table) {
            Some(table) => Ok(table),
            None => bail!(
                ErrorKind::DestinationTableMissing,
                "Destination table not found",
                format!("Table '{table}' does not exist")
            ),
        }
    }
}

/// In-memory destination for testing and development purposes.
///
/// [`MemoryDestination`] keeps every table in memory, including its definition, so tests can
/// inspect both the schema the reconciler produced and the rows the loader appended.
/// Deduplicating tables honor [`Destination::compact`] by keeping the last appended row per
/// sort key.
#[derive(Debug, Clone, Default)]
pub struct MemoryDestination {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDestination {
    /// Creates a new empty memory destination.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the definition of `table` as currently stored, including added columns.
    pub async fn table_definition(&self, table: &str) -> Option<TableDefinition> {
        let inner = self.inner.lock().await;
        inner.tables.get(table).map(|table| table.definition.clone())
    }

    /// Returns the statement `table` was created from, if it was copied from a source.
    pub async fn create_statement(&self, table: &str) -> Option<String> {
        let inner = self.inner.lock().await;
        inner
            .tables
            .get(table)
            .and_then(|table| table.statement.clone())
    }

    /// Returns a copy of the rows of `table`, aligned with its definition's columns.
    pub async fn table_rows(&self, table: &str) -> Vec<TableRow> {
        let inner = self.inner.lock().await;
        inner
            .tables
            .get(table)
            .map(|table| table.rows.clone())
            .unwrap_or_default()
    }

    /// Returns the values of one column of `table`, in row order.
    pub async fn column_values(&self, table: &str, column: &str) -> Vec<Cell> {
        let inner = self.inner.lock().await;
        let Some(table) = inner.tables.get(table) else {
            return Vec::new();
        };
        let Some(index) = table.column_index(column) else {
            return Vec::new();
        };

        table
            .rows
            .iter()
            .map(|row| row.values()[index].clone())
            .collect()
    }

    /// Returns the names of all tables.
    pub async fn tables(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut names: Vec<String> = inner.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drops every table.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.tables.clear();
    }
}

impl Destination for MemoryDestination {
    fn name() -> &'static str {
        "memory"
    }

    async fn table_exists(&self, table: &str) -> EtlResult<bool> {
        let inner = self.inner.lock().await;
        Ok(inner.tables.contains_key(table))
    }

    async fn row_count(&self, table: &str) -> EtlResult<u64> {
        let inner = self.inner.lock().await;
        Ok(inner.table(table)?.rows.len() as u64)
    }

    async fn max_value(&self, table: &str, column: &str) -> EtlResult<Option<Cell>> {
        let inner = self.inner.lock().await;
        let table = inner.table(table)?;
        let Some(index) = table.column_index(column) else {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Unknown destination column",
                format!(
                    "Column '{column}' does not exist in table '{}'",
                    table.definition.name
                )
            );
        };

        let max = table
            .rows
            .iter()
            .map(|row| &row.values()[index])
            .filter(|cell| !cell.is_null())
            .max_by(|a, b| a.partial_compare(b).unwrap_or(Ordering::Equal))
            .cloned();

        Ok(max)
    }

    async fn table_schema(&self, table: &str) -> EtlResult<Option<TableSchema>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tables
            .get(table)
            .map(|table| table.definition.schema()))
    }

    async fn create_table(&self, definition: &TableDefinition) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.tables.contains_key(&definition.name) {
            bail!(
                ErrorKind::DestinationTableAlreadyExists,
                "Destination table already exists",
                format!("Table '{}' already exists", definition.name)
            );
        }

        info!(table = %definition.name, columns = definition.columns.len(), "creating table");

        inner.tables.insert(
            definition.name.clone(),
            MemoryTable {
                definition: definition.clone(),
                rows: Vec::new(),
                statement: None,
            },
        );

        Ok(())
    }

    /// Statements are not interpreted: the table starts without columns, which are then added
    /// as batches arrive.
    async fn create_table_from_statement(&self, table: &str, statement: &str) -> EtlResult<bool> {
        let mut inner = self.inner.lock().await;
        if inner.tables.contains_key(table) {
            bail!(
                ErrorKind::DestinationTableAlreadyExists,
                "Destination table already exists",
                format!("Table '{table}' already exists")
            );
        }

        info!(table, "creating table from a source statement");

        let definition = TableDefinition {
            name: table.to_owned(),
            columns: Vec::new(),
            order_by: Vec::new(),
            engine: TableEngine::Append,
        };
        inner.tables.insert(
            table.to_owned(),
            MemoryTable {
                definition,
                rows: Vec::new(),
                statement: Some(statement.to_owned()),
            },
        );

        Ok(true)
    }

    async fn add_column(&self, table: &str, column: &ColumnSchema) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        let table = inner.table_mut(table)?;
        if table.column_index(&column.name).is_some() {
            bail!(
                ErrorKind::DestinationColumnAlreadyExists,
                "Destination column already exists",
                format!(
                    "Column '{}' already exists in table '{}'",
                    column.name, table.definition.name
                )
            );
        }

        info!(table = %table.definition.name, column = %column.name, "adding column");

        table.definition.columns.push(column.clone());
        for row in &mut table.rows {
            row.values_mut().push(Cell::Null);
        }

        Ok(())
    }

    async fn append_rows(
        &self,
        table: &str,
        columns: &[BatchColumn],
        rows: Vec<TableRow>,
    ) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        let table = inner.table_mut(table)?;

        let mut positions = Vec::with_capacity(columns.len());
        for column in columns {
            let Some(index) = table.column_index(&column.name) else {
                bail!(
                    ErrorKind::DestinationQueryFailed,
                    "Unknown destination column",
                    format!(
                        "Column '{}' does not exist in table '{}'",
                        column.name, table.definition.name
                    )
                );
            };
            positions.push(index);
        }

        let width = table.definition.columns.len();
        for row in rows {
            let mut values = vec![Cell::Null; width];
            for (position, value) in positions.iter().zip(row.into_values()) {
                values[*position] = value;
            }
            table.rows.push(TableRow::new(values));
        }

        Ok(())
    }

    async fn compact(&self, table: &str) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        let table = inner.table_mut(table)?;
        if table.definition.engine != TableEngine::Deduplicating
            || table.definition.order_by.is_empty()
        {
            return Ok(());
        }

        let key_positions: Vec<usize> = table
            .definition
            .order_by
            .iter()
            .filter_map(|column| table.column_index(column))
            .collect();

        let mut seen: HashSet<String> = HashSet::new();
        let mut kept: Vec<TableRow> = Vec::with_capacity(table.rows.len());
        for row in table.rows.drain(..).rev() {
            let key = key_positions
                .iter()
                .map(|position| format!("{:?}", row.values()[*position]))
                .collect::<Vec<_>>()
                .join("\u{1f}");
            if seen.insert(key) {
                kept.push(row);
            }
        }
        kept.reverse();
        table.rows = kept;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnType;

    fn definition(engine: TableEngine) -> TableDefinition {
        TableDefinition {
            name: "users".into(),
            columns: vec![
                ColumnSchema::new(
                    "id",
                    ColumnType::Integer {
                        bits: 64,
                        signed: true,
                    },
                    false,
                ),
                ColumnSchema::new("name", ColumnType::Text, true),
            ],
            order_by: vec!["id".into()],
            engine,
        }
    }

    fn columns() -> Vec<BatchColumn> {
        vec![
            BatchColumn::new(
                "id",
                ColumnType::Integer {
                    bits: 64,
                    signed: true,
                },
            ),
            BatchColumn::new("name", ColumnType::Text),
        ]
    }

    fn row(id: i64, name: &str) -> TableRow {
        TableRow::new(vec![Cell::I64(id), Cell::String(name.into())])
    }

    #[tokio::test]
    async fn compaction_keeps_latest_version_per_key() {
        let destination = MemoryDestination::new();
        destination
            .create_table(&definition(TableEngine::Deduplicating))
            .await
            .unwrap();
        destination
            .append_rows(
                "users",
                &columns(),
                vec![row(1, "old"), row(2, "bob"), row(1, "new")],
            )
            .await
            .unwrap();

        destination.compact("users").await.unwrap();

        assert_eq!(destination.row_count("users").await.unwrap(), 2);
        assert_eq!(
            destination.column_values("users", "name").await,
            vec![Cell::String("bob".into()), Cell::String("new".into())]
        );
        assert_eq!(
            destination.max_value("users", "id").await.unwrap(),
            Some(Cell::I64(2))
        );
    }

    #[tokio::test]
    async fn ddl_reports_already_exists_kinds() {
        let destination = MemoryDestination::new();
        destination
            .create_table(&definition(TableEngine::Append))
            .await
            .unwrap();

        let err = destination
            .create_table(&definition(TableEngine::Append))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationTableAlreadyExists);

        let err = destination
            .add_column("users", &ColumnSchema::new("name", ColumnType::Text, true))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationColumnAlreadyExists);
    }

    #[tokio::test]
    async fn append_rejects_unknown_columns() {
        let destination = MemoryDestination::new();
        destination
            .create_table(&definition(TableEngine::Append))
            .await
            .unwrap();

        let err = destination
            .append_rows(
                "users",
                &[BatchColumn::new("email", ColumnType::Text)],
                vec![TableRow::new(vec![Cell::String("a@b".into())])],
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationQueryFailed);
        assert_eq!(destination.row_count("users").await.unwrap(), 0);
    }
}
