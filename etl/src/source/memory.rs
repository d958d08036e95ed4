use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::filter::Predicate;
use crate::routing::matches_pattern;
use crate::source::{ScrollPage, Source};
use crate::types::{Batch, Cell, SourceObject};

/// A loosely shaped record: field names with their values, in field order.
pub type Record = Vec<(String, Cell)>;

#[derive(Debug)]
struct OpenScroll {
    remaining: Vec<Record>,
    page_size: usize,
    total: u64,
}

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<String, Vec<Record>>,
    scrolls: HashMap<String, OpenScroll>,
    next_scroll_id: u64,
    create_statements: HashMap<String, String>,
}

impl Inner {
    fn matching<'a>(
        &'a self,
        object: &SourceObject,
        predicate: &'a Predicate,
    ) -> EtlResult<impl Iterator<Item = &'a Record>> {
        let Some(records) = self.objects.get(&object.name) else {
            bail!(
                ErrorKind::SourceQueryFailed,
                "Source object not found",
                format!("Object '{}' does not exist", object.name)
            );
        };

        Ok(records
            .iter()
            .filter(move |record| admits(predicate, record)))
    }
}

fn admits(predicate: &Predicate, record: &Record) -> bool {
    let Some(column) = predicate.column() else {
        return true;
    };

    record
        .iter()
        .find(|(name, _)| name == column)
        .is_some_and(|(_, cell)| predicate.admits(cell))
}

fn field<'a>(record: &'a Record, name: &str) -> &'a Cell {
    record
        .iter()
        .find(|(field, _)| field == name)
        .map_or(&Cell::Null, |(_, cell)| cell)
}

/// In-memory source for testing and development purposes.
///
/// Objects are lists of [`Record`]s. Paged queries return records in insertion order; scrolls
/// sort by the requested column. Every operation a real source offers is supported, so the
/// memory source can stand in for a relational, columnar or search-index source.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends records to an object, creating it if needed.
    pub async fn insert_records<I>(&self, object: &str, records: I)
    where
        I: IntoIterator<Item = Record>,
    {
        let mut inner = self.inner.lock().await;
        inner
            .objects
            .entry(object.to_owned())
            .or_default()
            .extend(records);
    }

    /// Creates an empty object.
    pub async fn create_object(&self, object: &str) {
        let mut inner = self.inner.lock().await;
        inner.objects.entry(object.to_owned()).or_default();
    }

    /// Sets the `CREATE TABLE` statement reported for an object.
    pub async fn set_create_statement(&self, object: &str, statement: &str) {
        let mut inner = self.inner.lock().await;
        inner
            .create_statements
            .insert(object.to_owned(), statement.to_owned());
    }

    /// Returns the number of scroll cursors that were opened and not cleared.
    pub async fn open_scrolls(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.scrolls.len()
    }

    async fn next_page(&self, scroll_id: String) -> EtlResult<ScrollPage> {
        let mut inner = self.inner.lock().await;
        let Some(scroll) = inner.scrolls.get_mut(&scroll_id) else {
            bail!(
                ErrorKind::SourceQueryFailed,
                "Scroll cursor not found",
                format!("Scroll '{scroll_id}' is not open")
            );
        };

        let take = scroll.page_size.min(scroll.remaining.len());
        let page: Vec<Record> = scroll.remaining.drain(..take).collect();
        let total = scroll.total;

        Ok(ScrollPage {
            scroll_id: Some(scroll_id),
            batch: Batch::from_records(page),
            total: Some(total),
        })
    }
}

impl Source for MemorySource {
    fn name() -> &'static str {
        "memory"
    }

    async fn count_rows(&self, object: &SourceObject, predicate: &Predicate) -> EtlResult<u64> {
        let inner = self.inner.lock().await;
        Ok(inner.matching(object, predicate)?.count() as u64)
    }

    async fn fetch_page(
        &self,
        object: &SourceObject,
        predicate: &Predicate,
        limit: u64,
        offset: u64,
    ) -> EtlResult<Batch> {
        let inner = self.inner.lock().await;
        let page: Vec<Record> = inner
            .matching(object, predicate)?
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();

        debug!(object = %object.name, offset, rows = page.len(), "served memory page");

        Ok(Batch::from_records(page))
    }

    async fn open_scroll(
        &self,
        object: &SourceObject,
        predicate: &Predicate,
        sort_column: Option<&str>,
        page_size: u64,
    ) -> EtlResult<ScrollPage> {
        let scroll_id = {
            let mut inner = self.inner.lock().await;
            let mut remaining: Vec<Record> = inner.matching(object, predicate)?.cloned().collect();
            if let Some(sort_column) = sort_column {
                remaining.sort_by(|a, b| {
                    field(a, sort_column)
                        .partial_compare(field(b, sort_column))
                        .unwrap_or(Ordering::Equal)
                });
            }

            inner.next_scroll_id += 1;
            let scroll_id = format!("scroll-{}", inner.next_scroll_id);
            let total = remaining.len() as u64;
            inner.scrolls.insert(
                scroll_id.clone(),
                OpenScroll {
                    remaining,
                    page_size: page_size as usize,
                    total,
                },
            );
            scroll_id
        };

        self.next_page(scroll_id).await
    }

    async fn continue_scroll(&self, scroll_id: &str) -> EtlResult<ScrollPage> {
        self.next_page(scroll_id.to_owned()).await
    }

    async fn clear_scroll(&self, scroll_id: &str) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        inner.scrolls.remove(scroll_id);
        Ok(())
    }

    async fn create_statement(&self, object: &SourceObject) -> EtlResult<Option<String>> {
        let inner = self.inner.lock().await;
        Ok(inner.create_statements.get(&object.name).cloned())
    }

    async fn list_objects(&self, pattern: &str) -> EtlResult<Vec<String>> {
        let inner = self.inner.lock().await;
        let mut names: Vec<String> = inner
            .objects
            .keys()
            .filter(|name| matches_pattern(pattern, name))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }
}
