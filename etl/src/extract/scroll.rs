use metrics::counter;
use tracing::{debug, info, warn};

use crate::error::EtlResult;
use crate::extract::{ExtractionOptions, ExtractionReport, ExtractionStatus};
use crate::filter::Predicate;
use crate::metrics::{ETL_ROWS_EXTRACTED_TOTAL, OBJECT_LABEL};
use crate::source::{ScrollPage, Source};
use crate::types::{Batch, SourceObject};

/// Scroll-cursor extraction of a search index.
///
/// The cursor is sorted ascending by the object's ordering column so that a capped run still
/// advances the watermark monotonically. The page that crosses the row cap is trimmed and ends
/// the extraction. Source errors are returned as is; the cursor is cleared by
/// [`ScrollExtractor::finish`] whichever way the extraction ended.
#[derive(Debug)]
pub struct ScrollExtractor<'a, S> {
    source: &'a S,
    object: &'a SourceObject,
    predicate: &'a Predicate,
    options: ExtractionOptions,
    opened: bool,
    scroll_id: Option<String>,
    rows_matched: Option<u64>,
    rows_extracted: u64,
    trimmed: bool,
    exhausted: bool,
}

impl<'a, S> ScrollExtractor<'a, S>
where
    S: Source + Sync,
{
    pub(crate) fn new(
        source: &'a S,
        object: &'a SourceObject,
        predicate: &'a Predicate,
        options: ExtractionOptions,
    ) -> Self {
        Self {
            source,
            object,
            predicate,
            options,
            opened: false,
            scroll_id: None,
            rows_matched: None,
            rows_extracted: 0,
            trimmed: false,
            exhausted: false,
        }
    }

    pub(crate) async fn next_batch(&mut self) -> EtlResult<Option<Batch>> {
        if self.exhausted || self.rows_extracted >= self.options.max_rows {
            return Ok(None);
        }

        let page = self.next_page().await?;
        let Some(page) = page else {
            self.exhausted = true;
            return Ok(None);
        };

        if page.scroll_id.is_some() {
            self.scroll_id = page.scroll_id;
        }
        if page.total.is_some() {
            self.rows_matched = page.total;
        }

        let mut batch = page.batch;
        if batch.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }

        let remaining = (self.options.max_rows - self.rows_extracted) as usize;
        if batch.len() > remaining {
            batch.truncate(remaining);
            self.trimmed = true;
            self.exhausted = true;
        }

        let rows = batch.len() as u64;
        self.rows_extracted += rows;

        counter!(ETL_ROWS_EXTRACTED_TOTAL, OBJECT_LABEL => self.object.name.clone())
            .increment(rows);
        debug!(
            object = %self.object.name,
            rows,
            rows_extracted = self.rows_extracted,
            "extracted scroll page"
        );

        Ok(Some(batch))
    }

    pub(crate) async fn finish(mut self) -> ExtractionReport {
        if let Some(scroll_id) = self.scroll_id.take() {
            if let Err(err) = self.source.clear_scroll(&scroll_id).await {
                warn!(object = %self.object.name, error = %err, "failed to clear scroll cursor");
            }
        }

        let capped = self.trimmed
            || self
                .rows_matched
                .is_some_and(|matched| matched > self.options.max_rows);
        let status = if capped {
            ExtractionStatus::Capped
        } else {
            ExtractionStatus::Complete
        };

        ExtractionReport {
            status,
            rows_extracted: self.rows_extracted,
            rows_matched: self.rows_matched,
            pages_skipped: 0,
            final_page_size: self.options.scroll_page_size,
        }
    }

    async fn next_page(&mut self) -> EtlResult<Option<ScrollPage>> {
        if !self.opened {
            self.opened = true;
            let sort_column = self.object.ordering.as_ref().map(|column| column.name.as_str());

            info!(
                object = %self.object.name,
                sort_column,
                page_size = self.options.scroll_page_size,
                "opening scroll cursor"
            );

            let page = self
                .source
                .open_scroll(
                    self.object,
                    self.predicate,
                    sort_column,
                    self.options.scroll_page_size,
                )
                .await?;

            return Ok(Some(page));
        }

        // The source closed the cursor together with its last page.
        let Some(scroll_id) = self.scroll_id.as_deref() else {
            return Ok(None);
        };

        self.source.continue_scroll(scroll_id).await.map(Some)
    }
}
