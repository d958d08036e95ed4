//! Paged extraction of the records selected by a [`Predicate`].
//!
//! Tabular objects are read with limit/offset paging by [`OffsetExtractor`], search indices with
//! scroll cursors by [`ScrollExtractor`]. Both enforce the per-run row cap and hand out one
//! [`Batch`] at a time, so the caller never holds more than a page in memory.

mod offset;
mod scroll;

use etl_config::shared::ExtractionConfig;
use std::fmt;
use std::time::Duration;

pub use offset::OffsetExtractor;
pub use scroll::ScrollExtractor;

use crate::error::EtlResult;
use crate::filter::Predicate;
use crate::source::Source;
use crate::types::{Batch, ObjectKind, SourceObject};

/// Paging parameters for extracting one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionOptions {
    /// Initial rows per page of an offset extraction.
    pub page_size: u64,
    /// Rows per page of a scroll extraction.
    pub scroll_page_size: u64,
    pub max_rows: u64,
    pub min_page_size: u64,
    pub max_consecutive_failures: u32,
    pub retry_pause: Duration,
}

impl ExtractionOptions {
    /// Resolves the options of `object`, applying its overrides on top of `config`.
    pub fn for_object(config: &ExtractionConfig, object: &SourceObject) -> Self {
        let page_size = object.page_size.unwrap_or(config.page_size).max(1);

        Self {
            page_size,
            scroll_page_size: object.page_size.unwrap_or(config.scroll_page_size).max(1),
            max_rows: object.max_rows.unwrap_or(config.max_rows),
            min_page_size: config.min_page_size.clamp(1, page_size),
            max_consecutive_failures: config.max_consecutive_failures.max(1),
            retry_pause: Duration::from_millis(config.retry_pause_ms),
        }
    }
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            page_size: ExtractionConfig::DEFAULT_PAGE_SIZE,
            scroll_page_size: ExtractionConfig::DEFAULT_SCROLL_PAGE_SIZE,
            max_rows: ExtractionConfig::DEFAULT_MAX_ROWS,
            min_page_size: ExtractionConfig::DEFAULT_MIN_PAGE_SIZE,
            max_consecutive_failures: ExtractionConfig::DEFAULT_MAX_CONSECUTIVE_FAILURES,
            retry_pause: Duration::from_millis(ExtractionConfig::DEFAULT_RETRY_PAUSE_MS),
        }
    }
}

/// How an extraction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStatus {
    /// Every matching record was handed out.
    Complete,
    /// More records matched than the row cap allows.
    Capped,
    /// Pages were skipped or the extraction stopped after repeated failures.
    Partial,
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionStatus::Complete => f.write_str("complete"),
            ExtractionStatus::Capped => f.write_str("capped"),
            ExtractionStatus::Partial => f.write_str("partial"),
        }
    }
}

/// Summary of a finished extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionReport {
    pub status: ExtractionStatus,
    pub rows_extracted: u64,
    /// Records the source reported as matching, when known.
    pub rows_matched: Option<u64>,
    pub pages_skipped: u64,
    /// Page size in effect when the extraction ended, after any reductions.
    pub final_page_size: u64,
}

/// Extractor for one object, chosen by its [`ObjectKind`].
///
/// The extractor is a finite, non-restartable sequence of batches: call
/// [`Extractor::next_batch`] until it yields [`None`] (or fails), then always call
/// [`Extractor::finish`], which releases source-side resources such as scroll cursors.
#[derive(Debug)]
pub enum Extractor<'a, S> {
    Offset(OffsetExtractor<'a, S>),
    Scroll(ScrollExtractor<'a, S>),
}

impl<'a, S> Extractor<'a, S>
where
    S: Source + Sync,
{
    /// Prepares the extraction of `object`.
    ///
    /// Offset extractions count the matching records up front, which is the first source query
    /// of the object and fails the object when it fails.
    pub async fn start(
        source: &'a S,
        object: &'a SourceObject,
        predicate: &'a Predicate,
        options: ExtractionOptions,
    ) -> EtlResult<Self> {
        let extractor = match object.kind {
            ObjectKind::SearchIndex => {
                Extractor::Scroll(ScrollExtractor::new(source, object, predicate, options))
            }
            ObjectKind::Relational | ObjectKind::Columnar => Extractor::Offset(
                OffsetExtractor::start(source, object, predicate, options).await?,
            ),
        };

        Ok(extractor)
    }

    /// Returns the next non-empty batch, or [`None`] once the extraction is over.
    pub async fn next_batch(&mut self) -> EtlResult<Option<Batch>> {
        match self {
            Extractor::Offset(extractor) => Ok(extractor.next_batch().await),
            Extractor::Scroll(extractor) => extractor.next_batch().await,
        }
    }

    /// Ends the extraction and reports how it went.
    pub async fn finish(self) -> ExtractionReport {
        match self {
            Extractor::Offset(extractor) => extractor.finish(),
            Extractor::Scroll(extractor) => extractor.finish().await,
        }
    }
}
