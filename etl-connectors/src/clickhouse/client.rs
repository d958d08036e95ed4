use std::sync::Arc;
use std::time::Instant;

use clickhouse::{Client, Row};
use etl::error::{ErrorKind, EtlError, EtlResult};
use etl::etl_error;
use etl::filter::quote_identifier;
use etl::types::Cell;
use etl_config::shared::ClickHouseConnectionConfig;
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::clickhouse::encoding::rb_encode_row;
use crate::clickhouse::metrics::ETL_CH_INSERT_DURATION_SECONDS;
use crate::clickhouse::schema::{ClickHouseType, parse_clickhouse_type};

/// Capacity of the internal write buffer used per INSERT statement.
///
/// When this many bytes have been written to the buffer it is flushed to the
/// network, but the INSERT statement itself is only closed when `end()` is called or
/// the `max_bytes_per_insert` limit is reached.
const BUFFERED_CAPACITY: usize = 256 * 1024;

/// Server exception codes the connectors react to.
const DUPLICATE_COLUMN: u32 = 15;
const ILLEGAL_COLUMN: u32 = 44;
const TABLE_ALREADY_EXISTS: u32 = 57;
const UNKNOWN_TABLE: u32 = 60;
const MEMORY_LIMIT_EXCEEDED: u32 = 241;
const AUTHENTICATION_FAILED: u32 = 516;

#[derive(Debug, Row, Deserialize)]
struct ColumnRow {
    name: String,
    column_type: String,
}

#[derive(Debug, Row, Deserialize)]
struct NameRow {
    name: String,
}

#[derive(Debug, Row, Deserialize)]
struct StatementRow {
    statement: String,
}

#[derive(Debug, Row, Deserialize)]
struct JsonRow {
    row: String,
}

#[derive(Debug, Row, Deserialize)]
struct MaxRow {
    rows: u64,
    value: String,
}

/// Extracts the server exception code from a ClickHouse error.
///
/// Server-side failures arrive as `Code: <n>. DB::Exception: ...` responses.
pub(crate) fn exception_code(err: &clickhouse::error::Error) -> Option<u32> {
    let clickhouse::error::Error::BadResponse(response) = err else {
        return None;
    };

    let rest = &response[response.find("Code: ")? + "Code: ".len()..];
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Maps a ClickHouse error to an [`ErrorKind`], falling back to `fallback` for codes that carry
/// no special meaning for the sync.
pub(crate) fn classify(err: &clickhouse::error::Error, fallback: ErrorKind) -> ErrorKind {
    if matches!(err, clickhouse::error::Error::Network(_)) {
        return match fallback {
            ErrorKind::SourceQueryFailed => ErrorKind::SourceConnectionFailed,
            ErrorKind::DestinationQueryFailed => ErrorKind::DestinationConnectionFailed,
            other => other,
        };
    }

    match exception_code(err) {
        Some(MEMORY_LIMIT_EXCEEDED) => ErrorKind::SourceResourceExhausted,
        Some(TABLE_ALREADY_EXISTS) => ErrorKind::DestinationTableAlreadyExists,
        Some(DUPLICATE_COLUMN | ILLEGAL_COLUMN) => ErrorKind::DestinationColumnAlreadyExists,
        Some(UNKNOWN_TABLE) if fallback == ErrorKind::DestinationQueryFailed => {
            ErrorKind::DestinationTableMissing
        }
        Some(AUTHENTICATION_FAILED) => ErrorKind::AuthenticationError,
        _ => fallback,
    }
}

fn to_etl_error(
    fallback: ErrorKind,
    description: &'static str,
    detail: String,
    err: clickhouse::error::Error,
) -> EtlError {
    etl_error!(classify(&err, fallback), description, detail, source: err)
}

/// High-level ClickHouse client shared by [`super::ClickHouseSource`] and
/// [`super::ClickHouseDestination`].
///
/// Wraps a [`clickhouse::Client`] and exposes typed methods for probes, DDL, JSON row reads and
/// RowBinary bulk inserts. Cheaply cloneable.
#[derive(Clone)]
pub struct ClickHouseClient {
    inner: Arc<Client>,
}

impl ClickHouseClient {
    /// Creates a new [`ClickHouseClient`].
    ///
    /// When the URL starts with `https://`, TLS is handled by the `rustls-tls` feature using
    /// webpki root certificates.
    pub fn new(config: &ClickHouseConnectionConfig) -> Self {
        let mut client = Client::default()
            .with_url(&config.url)
            .with_user(&config.user)
            .with_database(&config.database)
            // Rows read as JSON keep 64-bit integers as numbers.
            .with_option("output_format_json_quote_64bit_integers", "0");

        if let Some(password) = &config.password {
            client = client.with_password(password.expose_secret());
        }

        Self {
            inner: Arc::new(client),
        }
    }

    pub async fn ping(&self, fallback: ErrorKind) -> EtlResult<()> {
        self.inner
            .query("SELECT 1")
            .fetch_one::<u8>()
            .await
            .map(|_| ())
            .map_err(|e| {
                let kind = match classify(&e, fallback) {
                    ErrorKind::SourceQueryFailed => ErrorKind::SourceConnectionFailed,
                    ErrorKind::DestinationQueryFailed => ErrorKind::DestinationConnectionFailed,
                    other => other,
                };
                etl_error!(
                    kind,
                    "ClickHouse connectivity check failed",
                    e.to_string(),
                    source: e
                )
            })
    }

    /// Executes a statement without result rows, such as DDL.
    pub(crate) async fn execute(
        &self,
        sql: &str,
        fallback: ErrorKind,
        description: &'static str,
    ) -> EtlResult<()> {
        self.inner
            .query(sql)
            .execute()
            .await
            .map_err(|e| to_etl_error(fallback, description, format!("`{sql}` failed: {e}"), e))
    }

    /// Runs a query returning a single `UInt64`, such as `SELECT count() ...`.
    pub(crate) async fn fetch_count(&self, sql: &str, fallback: ErrorKind) -> EtlResult<u64> {
        self.inner.query(sql).fetch_one::<u64>().await.map_err(|e| {
            to_etl_error(
                fallback,
                "ClickHouse count query failed",
                format!("`{sql}` failed: {e}"),
                e,
            )
        })
    }

    pub(crate) async fn table_exists(&self, table: &str) -> EtlResult<bool> {
        let sql = format!("EXISTS TABLE {}", quote_identifier(table));
        self.inner
            .query(&sql)
            .fetch_one::<u8>()
            .await
            .map(|exists| exists == 1)
            .map_err(|e| {
                to_etl_error(
                    ErrorKind::DestinationQueryFailed,
                    "ClickHouse table existence check failed",
                    format!("Failed to check table '{table}': {e}"),
                    e,
                )
            })
    }

    /// Returns the columns of `table` in the current database, in declaration order.
    ///
    /// An empty result means the table does not exist.
    pub(crate) async fn table_columns(
        &self,
        table: &str,
        fallback: ErrorKind,
    ) -> EtlResult<Vec<(String, ClickHouseType)>> {
        let rows = self
            .inner
            .query(
                "SELECT name, type AS column_type FROM system.columns \
                 WHERE database = currentDatabase() AND table = ? ORDER BY position",
            )
            .bind(table)
            .fetch_all::<ColumnRow>()
            .await
            .map_err(|e| {
                to_etl_error(
                    fallback,
                    "ClickHouse column introspection failed",
                    format!("Failed to read the columns of '{table}': {e}"),
                    e,
                )
            })?;

        Ok(rows
            .into_iter()
            .map(|row| (row.name, parse_clickhouse_type(&row.column_type)))
            .collect())
    }

    /// Returns the statement `SHOW CREATE TABLE` reports for `table`.
    pub(crate) async fn show_create_table(&self, table: &str) -> EtlResult<String> {
        let sql = format!("SHOW CREATE TABLE {}", quote_identifier(table));
        self.inner
            .query(&sql)
            .fetch_one::<StatementRow>()
            .await
            .map(|row| row.statement)
            .map_err(|e| {
                to_etl_error(
                    ErrorKind::SourceQueryFailed,
                    "ClickHouse SHOW CREATE TABLE failed",
                    format!("`{sql}` failed: {e}"),
                    e,
                )
            })
    }

    /// Returns the names of all tables in the current database, sorted.
    pub(crate) async fn table_names(&self) -> EtlResult<Vec<String>> {
        let rows = self
            .inner
            .query("SELECT name FROM system.tables WHERE database = currentDatabase() ORDER BY name")
            .fetch_all::<NameRow>()
            .await
            .map_err(|e| {
                to_etl_error(
                    ErrorKind::SourceQueryFailed,
                    "ClickHouse table listing failed",
                    e.to_string(),
                    e,
                )
            })?;

        Ok(rows.into_iter().map(|row| row.name).collect())
    }

    /// Returns the textual maximum of a column, or `None` when it holds no non-null value.
    ///
    /// `max` over an empty set yields the type's default in ClickHouse, so the rows are counted
    /// alongside it.
    pub(crate) async fn max_as_text(&self, table: &str, column: &str) -> EtlResult<Option<String>> {
        let column = quote_identifier(column);
        let sql = format!(
            "SELECT count() AS rows, ifNull(toString(max({column})), '') AS value \
             FROM {} WHERE {column} IS NOT NULL",
            quote_identifier(table)
        );

        let row = self.inner.query(&sql).fetch_one::<MaxRow>().await.map_err(|e| {
            to_etl_error(
                ErrorKind::WatermarkLookupFailed,
                "ClickHouse max query failed",
                format!("`{sql}` failed: {e}"),
                e,
            )
        })?;

        Ok((row.rows > 0).then_some(row.value))
    }

    /// Runs a query whose single column `row` holds one JSON document per row.
    pub(crate) async fn fetch_json_rows(
        &self,
        sql: &str,
        fallback: ErrorKind,
    ) -> EtlResult<Vec<String>> {
        let rows = self
            .inner
            .query(sql)
            .fetch_all::<JsonRow>()
            .await
            .map_err(|e| {
                to_etl_error(
                    fallback,
                    "ClickHouse page query failed",
                    format!("`{sql}` failed: {e}"),
                    e,
                )
            })?;

        Ok(rows.into_iter().map(|row| row.row).collect())
    }

    /// Inserts `rows` into the given columns of `table` using the RowBinary format.
    ///
    /// Each row holds one cell per entry of `columns`, encoded with the matching entry of
    /// `types`. When the accumulated uncompressed byte count reaches `max_bytes_per_insert`
    /// the current INSERT statement is committed and a new one is opened, keeping peak memory
    /// usage bounded for large batches.
    pub(crate) async fn insert_rows(
        &self,
        table: &str,
        columns: &[String],
        types: &[ClickHouseType],
        rows: Vec<Vec<Cell>>,
        max_bytes_per_insert: u64,
    ) -> EtlResult<()> {
        let column_list = columns
            .iter()
            .map(|column| quote_identifier(column))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({column_list}) FORMAT RowBinary",
            quote_identifier(table)
        );

        let mut insert = self
            .inner
            .insert_formatted_with(sql.clone())
            .buffered_with_capacity(BUFFERED_CAPACITY);
        let mut bytes = 0u64;
        let mut row_buf = Vec::new();
        let mut insert_start = Instant::now();

        for row in rows {
            row_buf.clear();
            rb_encode_row(row, types, &mut row_buf)?;

            insert.write_buffered(&row_buf);
            bytes += row_buf.len() as u64;

            if bytes >= max_bytes_per_insert {
                insert.end().await.map_err(|e| insert_error(table, e))?;
                metrics::histogram!(ETL_CH_INSERT_DURATION_SECONDS, "table" => table.to_string())
                    .record(insert_start.elapsed().as_secs_f64());

                insert = self
                    .inner
                    .insert_formatted_with(sql.clone())
                    .buffered_with_capacity(BUFFERED_CAPACITY);
                insert_start = Instant::now();
                bytes = 0;
            }
        }

        insert.end().await.map_err(|e| insert_error(table, e))?;
        metrics::histogram!(ETL_CH_INSERT_DURATION_SECONDS, "table" => table.to_string())
            .record(insert_start.elapsed().as_secs_f64());

        Ok(())
    }
}

fn insert_error(table: &str, err: clickhouse::error::Error) -> EtlError {
    let detail = format!("Failed to flush INSERT for '{table}': {err}");
    to_etl_error(ErrorKind::LoadFailed, "ClickHouse insert flush failed", detail, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bad_response(message: &str) -> clickhouse::error::Error {
        clickhouse::error::Error::BadResponse(message.to_owned())
    }

    #[test]
    fn exception_codes_are_read_from_the_response() {
        let err = bad_response(
            "Code: 241. DB::Exception: Memory limit (for query) exceeded. (MEMORY_LIMIT_EXCEEDED)",
        );
        assert_eq!(exception_code(&err), Some(241));
        assert_eq!(exception_code(&bad_response("no code here")), None);
    }

    #[test]
    fn memory_limit_is_resource_exhaustion() {
        let err = bad_response("Code: 241. DB::Exception: Memory limit exceeded");
        assert_eq!(
            classify(&err, ErrorKind::SourceQueryFailed),
            ErrorKind::SourceResourceExhausted
        );
    }

    #[test]
    fn ddl_races_are_recognized() {
        let table = bad_response("Code: 57. DB::Exception: Table default.orders already exists");
        let column = bad_response(
            "Code: 44. DB::Exception: Cannot add column `extra_flag`: column with this name already exists",
        );

        assert_eq!(
            classify(&table, ErrorKind::DestinationQueryFailed),
            ErrorKind::DestinationTableAlreadyExists
        );
        assert_eq!(
            classify(&column, ErrorKind::DestinationQueryFailed),
            ErrorKind::DestinationColumnAlreadyExists
        );
    }

    #[test]
    fn unknown_codes_use_the_fallback() {
        let err = bad_response("Code: 62. DB::Exception: Syntax error");
        assert_eq!(
            classify(&err, ErrorKind::SourceQueryFailed),
            ErrorKind::SourceQueryFailed
        );
        assert_eq!(
            classify(&err, ErrorKind::LoadFailed),
            ErrorKind::LoadFailed
        );
    }
}
