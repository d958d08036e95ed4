use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::connector::SourceConnector;
use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::filter::Predicate;
use crate::source::{ScrollPage, Source};
use crate::types::{Batch, SourceObject};

#[derive(Debug, Default)]
struct Faults {
    /// Failures handed out to the next fetches, one per call.
    scripted: VecDeque<ErrorKind>,
    /// Fetches asking for more rows than this fail with resource exhaustion.
    exhausted_above: Option<u64>,
    /// Fetches at or past this offset always fail with the given kind.
    failing_from_offset: Option<(u64, ErrorKind)>,
    fail_count: bool,
}

#[derive(Debug, Default)]
struct Inner {
    faults: Faults,
    fetch_calls: Vec<(u64, u64)>,
    shutdown_calls: u64,
    connections: u64,
}

/// Source wrapper that injects failures into paged queries and records how they were issued.
#[derive(Debug, Clone)]
pub struct FaultySource<S> {
    wrapped: S,
    inner: Arc<Mutex<Inner>>,
}

impl<S> FaultySource<S> {
    pub fn wrap(source: S) -> Self {
        Self {
            wrapped: source,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Makes the next `times` fetches fail with `kind`.
    pub async fn fail_next_fetches(&self, kind: ErrorKind, times: usize) {
        let mut inner = self.inner.lock().await;
        inner
            .faults
            .scripted
            .extend(std::iter::repeat_n(kind, times));
    }

    /// Makes every fetch with a limit above `limit` fail with resource exhaustion.
    pub async fn exhaust_above(&self, limit: u64) {
        let mut inner = self.inner.lock().await;
        inner.faults.exhausted_above = Some(limit);
    }

    /// Makes every fetch at or past `offset` fail with `kind`.
    pub async fn fail_from_offset(&self, offset: u64, kind: ErrorKind) {
        let mut inner = self.inner.lock().await;
        inner.faults.failing_from_offset = Some((offset, kind));
    }

    /// Makes row counting fail.
    pub async fn fail_count(&self) {
        let mut inner = self.inner.lock().await;
        inner.faults.fail_count = true;
    }

    /// Returns the `(limit, offset)` of every fetch, failed ones included.
    pub async fn fetch_calls(&self) -> Vec<(u64, u64)> {
        self.inner.lock().await.fetch_calls.clone()
    }

    pub async fn shutdown_calls(&self) -> u64 {
        self.inner.lock().await.shutdown_calls
    }

    pub async fn connections(&self) -> u64 {
        self.inner.lock().await.connections
    }

    async fn check_fetch(&self, limit: u64, offset: u64) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        inner.fetch_calls.push((limit, offset));

        let failing_offset = inner
            .faults
            .failing_from_offset
            .filter(|(from, _)| offset >= *from);

        let kind = if let Some(kind) = inner.faults.scripted.pop_front() {
            Some(kind)
        } else if let Some((_, kind)) = failing_offset {
            Some(kind)
        } else if inner
            .faults
            .exhausted_above
            .is_some_and(|threshold| limit > threshold)
        {
            Some(ErrorKind::SourceResourceExhausted)
        } else {
            None
        };

        match kind {
            Some(kind) => Err(etl_error!(
                kind,
                "Injected source failure",
                format!("Fetch of {limit} rows at offset {offset} was set up to fail")
            )),
            None => Ok(()),
        }
    }
}

impl<S> Source for FaultySource<S>
where
    S: Source + Send + Sync,
{
    fn name() -> &'static str {
        "faulty"
    }

    async fn shutdown(&self) -> EtlResult<()> {
        self.inner.lock().await.shutdown_calls += 1;
        self.wrapped.shutdown().await
    }

    async fn count_rows(&self, object: &SourceObject, predicate: &Predicate) -> EtlResult<u64> {
        if self.inner.lock().await.faults.fail_count {
            return Err(etl_error!(
                ErrorKind::SourceQueryFailed,
                "Injected source failure",
                "Row count was set up to fail"
            ));
        }

        self.wrapped.count_rows(object, predicate).await
    }

    async fn fetch_page(
        &self,
        object: &SourceObject,
        predicate: &Predicate,
        limit: u64,
        offset: u64,
    ) -> EtlResult<Batch> {
        self.check_fetch(limit, offset).await?;
        self.wrapped.fetch_page(object, predicate, limit, offset).await
    }

    async fn open_scroll(
        &self,
        object: &SourceObject,
        predicate: &Predicate,
        sort_column: Option<&str>,
        page_size: u64,
    ) -> EtlResult<ScrollPage> {
        self.wrapped
            .open_scroll(object, predicate, sort_column, page_size)
            .await
    }

    async fn continue_scroll(&self, scroll_id: &str) -> EtlResult<ScrollPage> {
        self.wrapped.continue_scroll(scroll_id).await
    }

    async fn clear_scroll(&self, scroll_id: &str) -> EtlResult<()> {
        self.wrapped.clear_scroll(scroll_id).await
    }

    async fn create_statement(&self, object: &SourceObject) -> EtlResult<Option<String>> {
        self.wrapped.create_statement(object).await
    }

    async fn list_objects(&self, pattern: &str) -> EtlResult<Vec<String>> {
        self.wrapped.list_objects(pattern).await
    }
}

impl<S> SourceConnector for FaultySource<S>
where
    S: Source + Clone + Send + Sync,
{
    type Source = FaultySource<S>;

    async fn connect(&self) -> EtlResult<Self::Source> {
        self.inner.lock().await.connections += 1;
        Ok(self.clone())
    }
}
