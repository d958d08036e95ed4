use metrics::counter;
use std::collections::HashSet;
use tracing::{info, warn};

use crate::destination::Destination;
use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::metrics::{DESTINATION_TABLE_LABEL, ETL_REJECTED_COLUMNS_TOTAL};
use crate::schema::coerce::align_batch;
use crate::source::Source;
use crate::types::{
    Batch, ColumnSchema, ObjectKind, SourceObject, TableDefinition, TableEngine, TableSchema,
};

/// The destination table a batch is reconciled against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTarget {
    pub table: String,
    /// Destination name of the ordering column.
    pub ordering_column: Option<String>,
    /// Destination names of the key columns.
    pub key_columns: Vec<String>,
}

impl TableTarget {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ordering_column: None,
            key_columns: Vec::new(),
        }
    }

    pub fn with_ordering_column(mut self, column: impl Into<String>) -> Self {
        self.ordering_column = Some(column.into());
        self
    }

    pub fn with_key_columns(mut self, key_columns: Vec<String>) -> Self {
        self.key_columns = key_columns;
        self
    }
}

/// What [`ensure_schema`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaChanges {
    /// Whether this call created the table.
    pub created: bool,
    pub added_columns: Vec<String>,
    /// Columns the destination refused. They were dropped from the batch.
    pub rejected_columns: Vec<String>,
}

/// Makes sure `target` can hold every column of `batch`, then aligns `batch` with the table.
///
/// A missing table is created from the batch. Columns missing from an existing table are added
/// as nullable columns. Losing a creation or add-column race to a concurrent writer counts as
/// success. A column the destination refuses for any other reason is dropped from the batch,
/// so the batch handed back only references columns that exist. Values whose type conflicts with
/// an existing column are coerced to the column's type.
///
/// Running this twice with the same batch issues no DDL the second time.
pub async fn ensure_schema<D>(
    destination: &D,
    target: &TableTarget,
    batch: &mut Batch,
) -> EtlResult<SchemaChanges>
where
    D: Destination + Sync,
{
    let mut changes = SchemaChanges::default();

    let schema = match destination.table_schema(&target.table).await? {
        Some(schema) => schema,
        None => {
            let definition = infer_definition(target, batch);
            match destination.create_table(&definition).await {
                Ok(()) => {
                    info!(
                        table = %target.table,
                        columns = definition.columns.len(),
                        engine = ?definition.engine,
                        order_by = ?definition.order_by,
                        "created destination table"
                    );
                    changes.created = true;
                    definition.schema()
                }
                Err(err) if err.kind() == ErrorKind::DestinationTableAlreadyExists => {
                    info!(table = %target.table, "table was created concurrently, diffing columns");
                    fetch_schema(destination, &target.table).await?
                }
                Err(err) => return Err(err),
            }
        }
    };

    let schema = add_missing_columns(destination, target, batch, schema, &mut changes).await?;

    if !changes.rejected_columns.is_empty() {
        let rejected: HashSet<String> = changes.rejected_columns.iter().cloned().collect();
        batch.drop_columns(&rejected);
    }

    align_batch(batch, &schema);

    Ok(changes)
}

/// Creates the destination table of a columnar object from the source table's own definition.
///
/// Returns whether the table was created. Nothing happens for other object kinds, when the
/// table already exists, or when the source or destination cannot share table definitions.
pub async fn copy_source_table<S, D>(
    source: &S,
    destination: &D,
    object: &SourceObject,
) -> EtlResult<bool>
where
    S: Source + Sync,
    D: Destination + Sync,
{
    if object.kind != ObjectKind::Columnar || destination.table_exists(&object.destination).await? {
        return Ok(false);
    }

    let Some(statement) = source.create_statement(object).await? else {
        return Ok(false);
    };

    match destination
        .create_table_from_statement(&object.destination, &statement)
        .await
    {
        Ok(created) => {
            if created {
                info!(
                    object = %object.name,
                    table = %object.destination,
                    "created destination table from the source definition"
                );
            }
            Ok(created)
        }
        Err(err) if err.kind() == ErrorKind::DestinationTableAlreadyExists => Ok(false),
        Err(err) => Err(err),
    }
}

async fn add_missing_columns<D>(
    destination: &D,
    target: &TableTarget,
    batch: &Batch,
    mut schema: TableSchema,
    changes: &mut SchemaChanges,
) -> EtlResult<TableSchema>
where
    D: Destination + Sync,
{
    let missing: Vec<ColumnSchema> = batch
        .columns()
        .iter()
        .filter(|column| !schema.has_column(&column.name))
        .map(|column| ColumnSchema::new(column.name.clone(), column.typ.clone(), true))
        .collect();

    let mut raced = Vec::new();
    for column in missing {
        match destination.add_column(&target.table, &column).await {
            Ok(()) => {
                info!(
                    table = %target.table,
                    column = %column.name,
                    typ = %column.typ,
                    "added column"
                );
                changes.added_columns.push(column.name.clone());
                schema.columns.push(column);
            }
            Err(err) if err.kind() == ErrorKind::DestinationColumnAlreadyExists => {
                raced.push(column.name);
            }
            Err(err) => {
                warn!(
                    table = %target.table,
                    column = %column.name,
                    error = %err,
                    "failed to add column, dropping it from the batch"
                );
                reject_column(target, changes, column.name);
            }
        }
    }

    if raced.is_empty() {
        return Ok(schema);
    }

    // Columns added by a concurrent writer may have a different type than the one inferred here.
    let schema = fetch_schema(destination, &target.table).await?;
    for column in raced {
        if !schema.has_column(&column) {
            warn!(
                table = %target.table,
                column = %column,
                "column reported as existing is missing from the table, dropping it from the batch"
            );
            reject_column(target, changes, column);
        }
    }

    Ok(schema)
}

fn reject_column(target: &TableTarget, changes: &mut SchemaChanges, column: String) {
    counter!(ETL_REJECTED_COLUMNS_TOTAL, DESTINATION_TABLE_LABEL => target.table.clone())
        .increment(1);
    changes.rejected_columns.push(column);
}

async fn fetch_schema<D>(destination: &D, table: &str) -> EtlResult<TableSchema>
where
    D: Destination + Sync,
{
    destination.table_schema(table).await?.ok_or_else(|| {
        etl_error!(
            ErrorKind::SchemaReconciliationFailed,
            "Destination table disappeared",
            format!("Table '{table}' was reported to exist but has no schema")
        )
    })
}

/// Derives the definition of a new table from the first batch loaded into it.
///
/// Sort columns are non-nullable. Key columns make the table deduplicating; without keys the
/// ordering column becomes the sort key of an append-only table. When a configured key column is
/// missing from the batch, the key is detected instead, see [`detect_key_columns`].
pub fn infer_definition(target: &TableTarget, batch: &Batch) -> TableDefinition {
    let present = |name: &str| batch.column_index(name).is_some();

    let keys: Vec<String> = if target.key_columns.iter().all(|key| present(key.as_str())) {
        target.key_columns.clone()
    } else {
        let detected = detect_key_columns(batch);
        warn!(
            table = %target.table,
            key_columns = ?target.key_columns,
            detected = ?detected,
            "key columns are missing from the first batch, using detected key columns"
        );
        detected
    };

    let ordering_column = target
        .ordering_column
        .as_deref()
        .filter(|&column| present(column));
    let is_sort_column =
        |name: &str| keys.iter().any(|key| key == name) || ordering_column == Some(name);

    let columns: Vec<ColumnSchema> = batch
        .columns()
        .iter()
        .map(|column| {
            ColumnSchema::new(
                column.name.clone(),
                column.typ.clone(),
                !is_sort_column(&column.name),
            )
        })
        .collect();

    let (order_by, engine) = if !keys.is_empty() {
        (keys, TableEngine::Deduplicating)
    } else {
        let order_by = ordering_column.map(str::to_owned).into_iter().collect();
        (order_by, TableEngine::Append)
    };

    TableDefinition {
        name: target.table.clone(),
        columns,
        order_by,
        engine,
    }
}

/// Picks the key of a keyed table whose configured key columns are absent from the data.
///
/// Columns named like identifiers (`*_id`) form the key, else the first column does.
pub fn detect_key_columns(batch: &Batch) -> Vec<String> {
    let ids: Vec<String> = batch
        .column_names()
        .filter(|name| name.ends_with("_id"))
        .map(str::to_owned)
        .collect();
    if !ids.is_empty() {
        return ids;
    }

    batch.column_names().take(1).map(str::to_owned).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::memory::MemoryDestination;
    use crate::source::memory::MemorySource;
    use crate::test_utils::test_destination_wrapper::TestDestinationWrapper;
    use crate::types::{BatchColumn, Cell, ColumnType, TableRow};

    fn batch(columns: &[(&str, ColumnType)]) -> Batch {
        let row = TableRow::new(vec![Cell::Null; columns.len()]);
        Batch::new(
            columns
                .iter()
                .map(|(name, typ)| BatchColumn::new(*name, typ.clone()))
                .collect(),
            vec![row],
        )
    }

    #[test]
    fn keyed_tables_deduplicate_on_their_keys() {
        let target = TableTarget::new("orders")
            .with_ordering_column("updated_at")
            .with_key_columns(vec!["order_id".into()]);
        let batch = batch(&[
            ("order_id", ColumnType::Text),
            ("updated_at", ColumnType::Timestamp),
            ("note", ColumnType::Text),
        ]);

        let definition = infer_definition(&target, &batch);

        assert_eq!(definition.engine, TableEngine::Deduplicating);
        assert_eq!(definition.order_by, ["order_id"]);
        assert_eq!(
            definition
                .columns
                .iter()
                .map(|column| column.nullable)
                .collect::<Vec<_>>(),
            [false, false, true]
        );
    }

    #[test]
    fn unkeyed_tables_sort_by_the_ordering_column() {
        let target = TableTarget::new("perfhist_sms").with_ordering_column("opensearch_timestamp");
        let batch = batch(&[
            ("opensearch_timestamp", ColumnType::Timestamp),
            ("cpu", ColumnType::Float { bits: 64 }),
        ]);

        let definition = infer_definition(&target, &batch);

        assert_eq!(definition.engine, TableEngine::Append);
        assert_eq!(definition.order_by, ["opensearch_timestamp"]);

        let definition = infer_definition(&TableTarget::new("raw"), &batch);
        assert!(definition.order_by.is_empty());
    }

    #[tokio::test]
    async fn reconciliation_is_idempotent() {
        let destination = MemoryDestination::new();
        let target = TableTarget::new("events");

        let mut first = batch(&[("a", ColumnType::Text)]);
        let changes = ensure_schema(&destination, &target, &mut first).await.unwrap();
        assert!(changes.created);

        let mut second = batch(&[("a", ColumnType::Text), ("b", ColumnType::Boolean)]);
        let changes = ensure_schema(&destination, &target, &mut second).await.unwrap();
        assert_eq!(changes.added_columns, ["b"]);

        let mut again = batch(&[("a", ColumnType::Text), ("b", ColumnType::Boolean)]);
        let changes = ensure_schema(&destination, &target, &mut again).await.unwrap();
        assert_eq!(changes, SchemaChanges::default());

        let definition = destination.table_definition("events").await.unwrap();
        assert_eq!(definition.columns.len(), 2);
        assert!(definition.columns[1].nullable);
    }

    #[test]
    fn missing_keys_fall_back_to_the_first_column_without_identifiers() {
        let target = TableTarget::new("hosts").with_key_columns(vec!["host_key".into()]);
        let batch = batch(&[("hostname", ColumnType::Text), ("cpu", ColumnType::Text)]);

        let definition = infer_definition(&target, &batch);

        assert_eq!(definition.engine, TableEngine::Deduplicating);
        assert_eq!(definition.order_by, ["hostname"]);
        assert!(!definition.columns[0].nullable);
        assert!(definition.columns[1].nullable);
    }

    #[test]
    fn identifier_columns_are_detected_as_keys() {
        let batch = batch(&[
            ("name", ColumnType::Text),
            ("order_id", ColumnType::Text),
            ("customer_id", ColumnType::Text),
        ]);

        assert_eq!(detect_key_columns(&batch), ["order_id", "customer_id"]);
    }

    #[tokio::test]
    async fn unconfirmed_existing_column_is_rejected() {
        let destination = TestDestinationWrapper::wrap(MemoryDestination::new());
        let target = TableTarget::new("events");
        let mut first = batch(&[("a", ColumnType::Text)]);
        ensure_schema(&destination, &target, &mut first).await.unwrap();

        destination.misreport_column_as_existing("b").await;
        let mut second = batch(&[("a", ColumnType::Text), ("b", ColumnType::Text)]);
        let changes = ensure_schema(&destination, &target, &mut second).await.unwrap();

        assert_eq!(changes.rejected_columns, ["b"]);
        assert_eq!(second.column_names().collect::<Vec<_>>(), ["a"]);
    }

    const NODE_SAMPLES_DDL: &str =
        "CREATE TABLE metrics.node_samples (`ts` UInt64) ENGINE = MergeTree ORDER BY ts";

    #[tokio::test]
    async fn columnar_tables_are_copied_from_the_source() {
        let source = MemorySource::new();
        source
            .set_create_statement("node_samples", NODE_SAMPLES_DDL)
            .await;
        let destination = MemoryDestination::new();
        let object = SourceObject::new("node_samples", ObjectKind::Columnar, "metrics")
            .with_destination("metrics_node_samples");

        assert!(copy_source_table(&source, &destination, &object).await.unwrap());
        assert!(!copy_source_table(&source, &destination, &object).await.unwrap());

        assert_eq!(
            destination.create_statement("metrics_node_samples").await.as_deref(),
            Some(NODE_SAMPLES_DDL)
        );
    }

    #[tokio::test]
    async fn other_object_kinds_are_never_copied() {
        let source = MemorySource::new();
        source.set_create_statement("orders", "CREATE TABLE orders (id Int64)").await;
        let destination = MemoryDestination::new();
        let object = SourceObject::new("orders", ObjectKind::Relational, "guava");

        assert!(!copy_source_table(&source, &destination, &object).await.unwrap());
        assert!(destination.tables().await.is_empty());
    }

    #[tokio::test]
    async fn sources_without_statements_leave_creation_to_the_first_batch() {
        let source = MemorySource::new();
        let destination = MemoryDestination::new();
        let object = SourceObject::new("node_samples", ObjectKind::Columnar, "metrics");

        assert!(!copy_source_table(&source, &destination, &object).await.unwrap());
        assert!(destination.tables().await.is_empty());
    }
}
