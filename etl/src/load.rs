//! Appending transformed batches to destination tables.

use metrics::counter;
use tracing::{debug, info, warn};

use crate::destination::Destination;
use crate::error::EtlResult;
use crate::metrics::{
    DESTINATION_TABLE_LABEL, ERROR_KIND_LABEL, ETL_LOAD_FAILURES_TOTAL, ETL_ROWS_LOADED_TOTAL,
};
use crate::types::Batch;

/// Appends `batch` to `table` in chunks of at most `write_batch_size` rows.
///
/// Returns the number of rows written. The first chunk the destination rejects ends the load of
/// this batch with its error; chunks appended before it stay in the table.
pub async fn load_batch<D>(
    destination: &D,
    table: &str,
    batch: Batch,
    write_batch_size: usize,
) -> EtlResult<u64>
where
    D: Destination + Sync,
{
    if batch.is_empty() {
        return Ok(0);
    }

    let (columns, rows) = batch.into_parts();
    let write_batch_size = write_batch_size.max(1);
    let mut written = 0u64;

    let mut rows = rows.into_iter().peekable();
    while rows.peek().is_some() {
        let chunk: Vec<_> = rows.by_ref().take(write_batch_size).collect();
        let chunk_len = chunk.len() as u64;

        if let Err(err) = destination.append_rows(table, &columns, chunk).await {
            warn!(
                table,
                rows_written = written,
                rows_lost = chunk_len,
                error = %err,
                "failed to append write batch"
            );
            counter!(
                ETL_LOAD_FAILURES_TOTAL,
                DESTINATION_TABLE_LABEL => table.to_owned(),
                ERROR_KIND_LABEL => format!("{:?}", err.kind())
            )
            .increment(1);

            return Err(err);
        }

        written += chunk_len;
        counter!(ETL_ROWS_LOADED_TOTAL, DESTINATION_TABLE_LABEL => table.to_owned())
            .increment(chunk_len);
        debug!(table, rows = chunk_len, "appended write batch");
    }

    Ok(written)
}

/// Compacts a deduplicating table and returns its row count.
///
/// Append-only tables skip compaction.
pub async fn finalize_table<D>(destination: &D, table: &str, deduplicating: bool) -> EtlResult<u64>
where
    D: Destination + Sync,
{
    if deduplicating {
        info!(table, "compacting deduplicating table");
        destination.compact(table).await?;
    }

    destination.row_count(table).await
}
