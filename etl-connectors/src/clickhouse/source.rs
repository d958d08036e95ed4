use std::collections::HashMap;
use std::sync::Arc;

use etl::conversions::json::json_to_cell;
use etl::error::{ErrorKind, EtlResult};
use etl::etl_error;
use etl::filter::{Predicate, quote_identifier};
use etl::routing::matches_pattern;
use etl::schema::coerce_cell;
use etl::source::Source;
use etl::types::{Batch, BatchColumn, Cell, SourceObject, TableRow};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::clickhouse::client::ClickHouseClient;
use crate::clickhouse::schema::ClickHouseType;

type TableLayout = Arc<[(String, ClickHouseType)]>;

/// ClickHouse tables read as a columnar source.
///
/// Pages are fetched with `LIMIT`/`OFFSET`, each row rendered server-side as one JSON document
/// through `formatRow('JSONEachRow', ...)` and decoded against the column types listed in
/// `system.columns`. Batches keep the table's column order.
#[derive(Clone)]
pub struct ClickHouseSource {
    client: ClickHouseClient,
    layouts: Arc<RwLock<HashMap<String, TableLayout>>>,
}

impl ClickHouseSource {
    pub fn new(client: ClickHouseClient) -> Self {
        Self {
            client,
            layouts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn layout(&self, table: &str) -> EtlResult<TableLayout> {
        if let Some(layout) = self.layouts.read().await.get(table) {
            return Ok(Arc::clone(layout));
        }

        let columns = self
            .client
            .table_columns(table, ErrorKind::SourceQueryFailed)
            .await?;
        if columns.is_empty() {
            return Err(etl_error!(
                ErrorKind::SourceQueryFailed,
                "Source table not found",
                format!("Table '{table}' does not exist in the source database")
            ));
        }

        let layout: TableLayout = columns.into();
        self.layouts
            .write()
            .await
            .insert(table.to_owned(), Arc::clone(&layout));

        Ok(layout)
    }
}

/// Builds the page query for `object`.
fn build_page_sql(
    object: &SourceObject,
    layout: &[(String, ClickHouseType)],
    predicate: &Predicate,
    limit: u64,
    offset: u64,
) -> String {
    let columns = layout
        .iter()
        .map(|(name, _)| quote_identifier(name))
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!(
        "SELECT formatRow('JSONEachRow', {columns}) AS row FROM {}",
        quote_identifier(&object.name)
    );

    let filter = predicate.to_sql_where();
    if !filter.is_empty() {
        sql.push(' ');
        sql.push_str(&filter);
    }

    sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
    sql
}

/// Decodes `formatRow` documents into a batch laid out like the table.
fn decode_rows(layout: &[(String, ClickHouseType)], documents: Vec<String>) -> EtlResult<Batch> {
    let columns: Vec<BatchColumn> = layout
        .iter()
        .map(|(name, typ)| BatchColumn::new(name.clone(), typ.column_type()))
        .collect();

    let mut rows = Vec::with_capacity(documents.len());
    for document in documents {
        let mut fields: Map<String, Value> = serde_json::from_str(document.trim()).map_err(|e| {
            etl_error!(
                ErrorKind::DeserializationError,
                "Invalid ClickHouse row",
                format!("Failed to parse a row rendered as JSON: {e}"),
                source: e
            )
        })?;

        let values = columns
            .iter()
            .map(|column| {
                let cell = fields
                    .remove(&column.name)
                    .map(json_to_cell)
                    .unwrap_or(Cell::Null);
                coerce_cell(cell, &column.typ)
            })
            .collect();
        rows.push(TableRow::new(values));
    }

    Ok(Batch::new(columns, rows))
}

impl Source for ClickHouseSource {
    fn name() -> &'static str {
        "clickhouse"
    }

    async fn count_rows(&self, object: &SourceObject, predicate: &Predicate) -> EtlResult<u64> {
        let mut sql = format!("SELECT count() FROM {}", quote_identifier(&object.name));
        let filter = predicate.to_sql_where();
        if !filter.is_empty() {
            sql.push(' ');
            sql.push_str(&filter);
        }

        self.client
            .fetch_count(&sql, ErrorKind::SourceQueryFailed)
            .await
    }

    async fn fetch_page(
        &self,
        object: &SourceObject,
        predicate: &Predicate,
        limit: u64,
        offset: u64,
    ) -> EtlResult<Batch> {
        let layout = self.layout(&object.name).await?;
        let sql = build_page_sql(object, &layout, predicate, limit, offset);
        let documents = self
            .client
            .fetch_json_rows(&sql, ErrorKind::SourceQueryFailed)
            .await?;
        debug!(table = %object.name, rows = documents.len(), offset, "fetched clickhouse page");

        decode_rows(&layout, documents)
    }

    async fn create_statement(&self, object: &SourceObject) -> EtlResult<Option<String>> {
        self.client.show_create_table(&object.name).await.map(Some)
    }

    async fn list_objects(&self, pattern: &str) -> EtlResult<Vec<String>> {
        let tables = self.client.table_names().await?;

        Ok(tables
            .into_iter()
            .filter(|table| matches_pattern(pattern, table))
            .collect())
    }
}
