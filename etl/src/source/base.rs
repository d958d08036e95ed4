use std::future::Future;

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::filter::Predicate;
use crate::types::{Batch, SourceObject};

/// One page of a scroll cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollPage {
    /// Cursor to continue from. [`None`] when the source closed the cursor itself.
    pub scroll_id: Option<String>,
    pub batch: Batch,
    /// Total number of matching records, when the source reports it.
    pub total: Option<u64>,
}

/// Trait for systems rows are incrementally extracted from.
///
/// Tabular sources implement the count and paged-query operations. Search-index sources also
/// implement the scroll and index-listing operations, which default to
/// [`ErrorKind::SourceOperationUnsupported`].
///
/// Implementations classify driver errors into [`ErrorKind`]s. In particular, a query rejected
/// because it exceeded a memory or resource limit must surface as
/// [`ErrorKind::SourceResourceExhausted`], since the extractor shrinks its page size only for
/// that kind.
pub trait Source {
    /// Returns the name of the source.
    fn name() -> &'static str;

    /// Releases the connection.
    ///
    /// The default implementation is a no-op.
    fn shutdown(&self) -> impl Future<Output = EtlResult<()>> + Send {
        async { Ok(()) }
    }

    /// Counts the records of `object` matching `predicate`.
    fn count_rows(
        &self,
        object: &SourceObject,
        predicate: &Predicate,
    ) -> impl Future<Output = EtlResult<u64>> + Send;

    /// Fetches at most `limit` matching records starting at `offset`.
    ///
    /// No ordering is requested, so the page contents depend on the source's natural order.
    fn fetch_page(
        &self,
        object: &SourceObject,
        predicate: &Predicate,
        limit: u64,
        offset: u64,
    ) -> impl Future<Output = EtlResult<Batch>> + Send;

    /// Opens a scroll cursor over the records matching `predicate`, sorted ascending by
    /// `sort_column` when given.
    fn open_scroll(
        &self,
        object: &SourceObject,
        predicate: &Predicate,
        sort_column: Option<&str>,
        page_size: u64,
    ) -> impl Future<Output = EtlResult<ScrollPage>> + Send {
        let _ = (object, predicate, sort_column, page_size);
        async { Err(unsupported("open_scroll")) }
    }

    /// Pulls the next page of an open scroll cursor.
    fn continue_scroll(
        &self,
        scroll_id: &str,
    ) -> impl Future<Output = EtlResult<ScrollPage>> + Send {
        let _ = scroll_id;
        async { Err(unsupported("continue_scroll")) }
    }

    /// Releases a scroll cursor.
    fn clear_scroll(&self, scroll_id: &str) -> impl Future<Output = EtlResult<()>> + Send {
        let _ = scroll_id;
        async { Err(unsupported("clear_scroll")) }
    }

    /// Returns the source's own `CREATE TABLE` statement for `object`.
    ///
    /// Columnar destinations of the same engine can recreate the table from it, keeping its
    /// engine, sort key and codecs. The default implementation returns [`None`].
    fn create_statement(
        &self,
        object: &SourceObject,
    ) -> impl Future<Output = EtlResult<Option<String>>> + Send {
        let _ = object;
        async { Ok(None) }
    }

    /// Lists the objects whose names match a `*` wildcard pattern, sorted by name.
    fn list_objects(&self, pattern: &str) -> impl Future<Output = EtlResult<Vec<String>>> + Send {
        let _ = pattern;
        async { Err(unsupported("list_objects")) }
    }
}

fn unsupported(operation: &'static str) -> crate::error::EtlError {
    etl_error!(
        ErrorKind::SourceOperationUnsupported,
        "Source operation not supported",
        format!("The source does not implement `{operation}`")
    )
}
