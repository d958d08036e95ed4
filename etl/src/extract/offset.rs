use metrics::counter;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::extract::{ExtractionOptions, ExtractionReport, ExtractionStatus};
use crate::filter::Predicate;
use crate::metrics::{
    ERROR_KIND_LABEL, ETL_PAGE_FAILURES_TOTAL, ETL_PAGE_SIZE_REDUCTIONS_TOTAL,
    ETL_ROWS_EXTRACTED_TOTAL, OBJECT_LABEL,
};
use crate::source::Source;
use crate::types::{Batch, SourceObject};

/// Limit/offset extraction of a tabular object.
///
/// The number of matching records is counted once and clamped to the row cap; pages are then
/// requested until the offset reaches that total. The offset advances by the rows a page actually
/// returned.
///
/// A page rejected for resource exhaustion is retried once at half the page size (never below
/// the floor), and the reduced size sticks for the rest of the run. Any other failure is retried
/// once after a pause. A page whose retry fails too is skipped, which counts as one consecutive
/// failure; enough of them in a row end the extraction with what was pulled so far.
#[derive(Debug)]
pub struct OffsetExtractor<'a, S> {
    source: &'a S,
    object: &'a SourceObject,
    predicate: &'a Predicate,
    options: ExtractionOptions,
    rows_matched: u64,
    total: u64,
    offset: u64,
    page_size: u64,
    rows_extracted: u64,
    pages_skipped: u64,
    consecutive_failures: u32,
    stopped_early: bool,
    exhausted: bool,
}

impl<'a, S> OffsetExtractor<'a, S>
where
    S: Source + Sync,
{
    pub(crate) async fn start(
        source: &'a S,
        object: &'a SourceObject,
        predicate: &'a Predicate,
        options: ExtractionOptions,
    ) -> EtlResult<Self> {
        let rows_matched = source.count_rows(object, predicate).await?;
        let total = rows_matched.min(options.max_rows);

        info!(
            object = %object.name,
            rows_matched,
            rows_to_extract = total,
            page_size = options.page_size,
            "starting offset extraction"
        );

        Ok(Self {
            source,
            object,
            predicate,
            page_size: options.page_size,
            options,
            rows_matched,
            total,
            offset: 0,
            rows_extracted: 0,
            pages_skipped: 0,
            consecutive_failures: 0,
            stopped_early: false,
            exhausted: false,
        })
    }

    pub(crate) async fn next_batch(&mut self) -> Option<Batch> {
        loop {
            if self.exhausted || self.offset >= self.total {
                return None;
            }

            if self.consecutive_failures >= self.options.max_consecutive_failures {
                warn!(
                    object = %self.object.name,
                    offset = self.offset,
                    consecutive_failures = self.consecutive_failures,
                    "stopping extraction after repeated page failures"
                );
                self.stopped_early = true;
                self.exhausted = true;

                return None;
            }

            let limit = self.limit();
            let err = match self.fetch(limit).await {
                Ok(batch) => return self.accept(batch),
                Err(err) => err,
            };

            let retry_limit = if err.kind() == ErrorKind::SourceResourceExhausted {
                self.reduce_page_size(&err);
                self.limit()
            } else {
                warn!(
                    object = %self.object.name,
                    offset = self.offset,
                    error = %err,
                    "page query failed, retrying after pause"
                );
                tokio::time::sleep(self.options.retry_pause).await;
                limit
            };

            match self.fetch(retry_limit).await {
                Ok(batch) => return self.accept(batch),
                Err(err) => self.skip_page(retry_limit, &err),
            }
        }
    }

    pub(crate) fn finish(self) -> ExtractionReport {
        let status = if self.pages_skipped > 0 || self.stopped_early {
            ExtractionStatus::Partial
        } else if self.rows_matched > self.options.max_rows {
            ExtractionStatus::Capped
        } else {
            ExtractionStatus::Complete
        };

        ExtractionReport {
            status,
            rows_extracted: self.rows_extracted,
            rows_matched: Some(self.rows_matched),
            pages_skipped: self.pages_skipped,
            final_page_size: self.page_size,
        }
    }

    fn limit(&self) -> u64 {
        self.page_size.min(self.total - self.offset)
    }

    async fn fetch(&self, limit: u64) -> EtlResult<Batch> {
        self.source
            .fetch_page(self.object, self.predicate, limit, self.offset)
            .await
    }

    fn accept(&mut self, mut batch: Batch) -> Option<Batch> {
        if batch.is_empty() {
            // The source ran dry before the counted total, e.g. rows were deleted meanwhile.
            debug!(
                object = %self.object.name,
                offset = self.offset,
                "source returned an empty page"
            );
            self.exhausted = true;

            return None;
        }

        let remaining = (self.total - self.offset) as usize;
        if batch.len() > remaining {
            batch.truncate(remaining);
        }

        let rows = batch.len() as u64;
        self.offset += rows;
        self.rows_extracted += rows;
        self.consecutive_failures = 0;

        counter!(ETL_ROWS_EXTRACTED_TOTAL, OBJECT_LABEL => self.object.name.clone())
            .increment(rows);
        debug!(
            object = %self.object.name,
            rows,
            offset = self.offset,
            total = self.total,
            "extracted page"
        );

        Some(batch)
    }

    fn reduce_page_size(&mut self, err: &EtlError) {
        let reduced = (self.page_size / 2)
            .max(self.options.min_page_size)
            .min(self.page_size);

        if reduced < self.page_size {
            counter!(ETL_PAGE_SIZE_REDUCTIONS_TOTAL, OBJECT_LABEL => self.object.name.clone())
                .increment(1);
        }

        warn!(
            object = %self.object.name,
            offset = self.offset,
            previous_page_size = self.page_size,
            page_size = reduced,
            error = %err,
            "source ran out of resources, retrying with a smaller page"
        );

        self.page_size = reduced;
    }

    fn skip_page(&mut self, limit: u64, err: &EtlError) {
        warn!(
            object = %self.object.name,
            offset = self.offset,
            skipped_rows = limit,
            error = %err,
            "page retry failed, skipping forward"
        );

        counter!(
            ETL_PAGE_FAILURES_TOTAL,
            OBJECT_LABEL => self.object.name.clone(),
            ERROR_KIND_LABEL => format!("{:?}", err.kind())
        )
        .increment(1);

        self.offset += limit;
        self.pages_skipped += 1;
        self.consecutive_failures += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory::{MemorySource, Record};
    use crate::types::{Cell, ObjectKind};
    use std::time::Duration;

    fn records(count: i64) -> Vec<Record> {
        (1..=count)
            .map(|id| vec![("id".to_string(), Cell::I64(id))])
            .collect()
    }

    fn options(page_size: u64, max_rows: u64) -> ExtractionOptions {
        ExtractionOptions {
            page_size,
            max_rows,
            min_page_size: 1,
            retry_pause: Duration::ZERO,
            ..ExtractionOptions::default()
        }
    }

    #[tokio::test]
    async fn pages_until_the_total_is_reached() {
        let source = MemorySource::new();
        source.insert_records("orders", records(25)).await;
        let object = SourceObject::new("orders", ObjectKind::Relational, "guava");

        let mut extractor =
            OffsetExtractor::start(&source, &object, &Predicate::All, options(10, 1000))
                .await
                .unwrap();

        let mut sizes = Vec::new();
        while let Some(batch) = extractor.next_batch().await {
            sizes.push(batch.len());
        }
        let report = extractor.finish();

        assert_eq!(sizes, [10, 10, 5]);
        assert_eq!(report.status, ExtractionStatus::Complete);
        assert_eq!(report.rows_extracted, 25);
    }

    #[tokio::test]
    async fn cap_limits_the_last_page() {
        let source = MemorySource::new();
        source.insert_records("orders", records(25)).await;
        let object = SourceObject::new("orders", ObjectKind::Relational, "guava");

        let mut extractor =
            OffsetExtractor::start(&source, &object, &Predicate::All, options(10, 15))
                .await
                .unwrap();

        let mut sizes = Vec::new();
        while let Some(batch) = extractor.next_batch().await {
            sizes.push(batch.len());
        }
        let report = extractor.finish();

        assert_eq!(sizes, [10, 5]);
        assert_eq!(report.status, ExtractionStatus::Capped);
        assert_eq!(report.rows_matched, Some(25));
    }
}
