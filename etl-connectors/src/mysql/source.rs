use std::collections::HashMap;
use std::sync::Arc;

use etl::error::{ErrorKind, EtlError, EtlResult};
use etl::etl_error;
use etl::filter::{Predicate, quote_identifier};
use etl::routing::matches_pattern;
use etl::schema::coerce_cell;
use etl::source::Source;
use etl::types::{Batch, BatchColumn, Cell, SourceObject, TableRow};
use sqlx::mysql::{MySqlDatabaseError, MySqlRow};
use sqlx::{MySqlPool, Row};
use tokio::sync::RwLock;
use tracing::debug;

use crate::mysql::schema::{MySqlColumn, MySqlColumnKind};

/// Server error numbers the source reacts to.
const ER_OUTOFMEMORY: u16 = 1037;
const ER_OUT_OF_SORTMEMORY: u16 = 1038;
const ER_OUT_OF_RESOURCES: u16 = 1041;
const ER_ACCESS_DENIED_ERROR: u16 = 1045;

/// Maps a driver error to an [`ErrorKind`], falling back to `fallback` for errors that carry no
/// special meaning for the sync.
pub(crate) fn classify(err: &sqlx::Error, fallback: ErrorKind) -> ErrorKind {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => ErrorKind::SourceConnectionFailed,
        sqlx::Error::Database(db) => {
            match db
                .try_downcast_ref::<MySqlDatabaseError>()
                .map(MySqlDatabaseError::number)
            {
                Some(ER_OUTOFMEMORY | ER_OUT_OF_SORTMEMORY | ER_OUT_OF_RESOURCES) => {
                    ErrorKind::SourceResourceExhausted
                }
                Some(ER_ACCESS_DENIED_ERROR) => ErrorKind::AuthenticationError,
                _ => fallback,
            }
        }
        _ => fallback,
    }
}

pub(crate) fn to_etl_error(
    fallback: ErrorKind,
    description: &'static str,
    detail: String,
    err: sqlx::Error,
) -> EtlError {
    etl_error!(classify(&err, fallback), description, detail, source: err)
}

/// MySQL or MariaDB tables read as a relational source.
///
/// Pages are fetched with `LIMIT`/`OFFSET`. Integer and floating point columns are read
/// natively, every other column as text, and values are then coerced to the column types derived
/// from `information_schema.columns`.
#[derive(Debug, Clone)]
pub struct MySqlSource {
    pool: MySqlPool,
    columns: Arc<RwLock<HashMap<String, Arc<[MySqlColumn]>>>>,
}

impl MySqlSource {
    pub fn new(pool: MySqlPool) -> Self {
        Self {
            pool,
            columns: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn table_columns(&self, table: &str) -> EtlResult<Arc<[MySqlColumn]>> {
        if let Some(columns) = self.columns.read().await.get(table) {
            return Ok(Arc::clone(columns));
        }

        let query = r#"
            SELECT
                CAST(column_name AS CHAR) AS name,
                CAST(data_type AS CHAR) AS data_type,
                CAST(column_type AS CHAR) AS column_type
            FROM information_schema.columns
            WHERE table_schema = DATABASE()
            AND table_name = ?
            ORDER BY ordinal_position
        "#;

        let rows = sqlx::query(query)
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                to_etl_error(
                    ErrorKind::SourceQueryFailed,
                    "MySQL column introspection failed",
                    format!("Failed to read the columns of '{table}': {e}"),
                    e,
                )
            })?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = try_get(&row, "name")?;
            let data_type: String = try_get(&row, "data_type")?;
            let column_type: String = try_get(&row, "column_type")?;
            columns.push(MySqlColumn::new(name, &data_type, &column_type));
        }

        if columns.is_empty() {
            return Err(etl_error!(
                ErrorKind::SourceQueryFailed,
                "Source table not found",
                format!("Table '{table}' does not exist in the source database")
            ));
        }

        let columns: Arc<[MySqlColumn]> = columns.into();
        self.columns
            .write()
            .await
            .insert(table.to_owned(), Arc::clone(&columns));

        Ok(columns)
    }
}

fn try_get<'r, T>(row: &'r MySqlRow, column: &str) -> EtlResult<T>
where
    T: sqlx::Decode<'r, sqlx::MySql> + sqlx::Type<sqlx::MySql>,
{
    row.try_get(column).map_err(|e| {
        etl_error!(
            ErrorKind::ConversionError,
            "MySQL value decoding failed",
            format!("Failed to decode column '{column}': {e}"),
            source: e
        )
    })
}

/// Builds the page query for `object`.
fn build_page_sql(object: &SourceObject, columns: &[MySqlColumn], predicate: &Predicate) -> String {
    let select_list = columns
        .iter()
        .map(MySqlColumn::select_expr)
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!(
        "SELECT {select_list} FROM {}",
        quote_identifier(&object.name)
    );

    let filter = predicate.to_sql_where();
    if !filter.is_empty() {
        sql.push(' ');
        sql.push_str(&filter);
    }

    sql.push_str(" LIMIT ? OFFSET ?");
    sql
}

fn decode_cell(row: &MySqlRow, column: &MySqlColumn) -> EtlResult<Cell> {
    let name = column.name.as_str();
    let cell = match column.kind {
        MySqlColumnKind::Integer { signed: true, .. } => {
            try_get::<Option<i64>>(row, name)?.map_or(Cell::Null, Cell::I64)
        }
        MySqlColumnKind::Integer { signed: false, .. } => {
            try_get::<Option<u64>>(row, name)?.map_or(Cell::Null, Cell::U64)
        }
        MySqlColumnKind::Float { bits: 32 } => {
            try_get::<Option<f32>>(row, name)?.map_or(Cell::Null, Cell::F32)
        }
        MySqlColumnKind::Float { .. } => {
            try_get::<Option<f64>>(row, name)?.map_or(Cell::Null, Cell::F64)
        }
        MySqlColumnKind::Timestamp | MySqlColumnKind::Text => {
            try_get::<Option<String>>(row, name)?.map_or(Cell::Null, Cell::String)
        }
    };

    Ok(coerce_cell(cell, &column.column_type()))
}

impl Source for MySqlSource {
    fn name() -> &'static str {
        "mysql"
    }

    async fn shutdown(&self) -> EtlResult<()> {
        self.pool.close().await;
        Ok(())
    }

    async fn count_rows(&self, object: &SourceObject, predicate: &Predicate) -> EtlResult<u64> {
        let mut sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(&object.name));
        let filter = predicate.to_sql_where();
        if !filter.is_empty() {
            sql.push(' ');
            sql.push_str(&filter);
        }

        let count: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                to_etl_error(
                    ErrorKind::SourceQueryFailed,
                    "MySQL count query failed",
                    format!("`{sql}` failed: {e}"),
                    e,
                )
            })?;

        Ok(count.max(0) as u64)
    }

    async fn fetch_page(
        &self,
        object: &SourceObject,
        predicate: &Predicate,
        limit: u64,
        offset: u64,
    ) -> EtlResult<Batch> {
        let columns = self.table_columns(&object.name).await?;
        let sql = build_page_sql(object, &columns, predicate);

        let rows = sqlx::query(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                to_etl_error(
                    ErrorKind::SourceQueryFailed,
                    "MySQL page query failed",
                    format!("`{sql}` with limit {limit} and offset {offset} failed: {e}"),
                    e,
                )
            })?;
        debug!(table = %object.name, rows = rows.len(), offset, "fetched mysql page");

        let mut table_rows = Vec::with_capacity(rows.len());
        for row in &rows {
            let values = columns
                .iter()
                .map(|column| decode_cell(row, column))
                .collect::<EtlResult<Vec<_>>>()?;
            table_rows.push(TableRow::new(values));
        }

        let batch_columns = columns
            .iter()
            .map(|column| BatchColumn::new(column.name.clone(), column.column_type()))
            .collect();

        Ok(Batch::new(batch_columns, table_rows))
    }

    async fn list_objects(&self, pattern: &str) -> EtlResult<Vec<String>> {
        let query = r#"
            SELECT CAST(table_name AS CHAR) AS name
            FROM information_schema.tables
            WHERE table_schema = DATABASE()
            ORDER BY table_name
        "#;

        let tables: Vec<String> = sqlx::query_scalar(query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                to_etl_error(
                    ErrorKind::SourceQueryFailed,
                    "MySQL table listing failed",
                    e.to_string(),
                    e,
                )
            })?;

        Ok(tables
            .into_iter()
            .filter(|table| matches_pattern(pattern, table))
            .collect())
    }
}
