use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Paging, retry and write settings of incremental extraction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExtractionConfig {
    /// Rows requested per page from tabular sources.
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    /// Rows requested per scroll page from search-index sources.
    #[serde(default = "default_scroll_page_size")]
    pub scroll_page_size: u64,
    /// Maximum number of rows pulled per object and run.
    #[serde(default = "default_max_rows")]
    pub max_rows: u64,
    /// Lower bound the page size is halved down to on resource exhaustion.
    #[serde(default = "default_min_page_size")]
    pub min_page_size: u64,
    /// Consecutive failed page cycles after which extraction stops early.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    /// Pause before retrying a page that failed for a reason other than resource exhaustion.
    #[serde(default = "default_retry_pause_ms")]
    pub retry_pause_ms: u64,
    /// Rows per append call to the destination.
    #[serde(default = "default_write_batch_size")]
    pub write_batch_size: usize,
}

impl ExtractionConfig {
    pub const DEFAULT_PAGE_SIZE: u64 = 500;

    pub const DEFAULT_SCROLL_PAGE_SIZE: u64 = 1000;

    pub const DEFAULT_MAX_ROWS: u64 = 100_000;

    pub const DEFAULT_MIN_PAGE_SIZE: u64 = 100;

    pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

    pub const DEFAULT_RETRY_PAUSE_MS: u64 = 2000;

    pub const DEFAULT_WRITE_BATCH_SIZE: usize = 10_000;

    /// Validates extraction settings.
    ///
    /// Every size must be non-zero and the page-size floor cannot exceed the page size.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let non_zero = [
            ("extraction.page_size", self.page_size),
            ("extraction.scroll_page_size", self.scroll_page_size),
            ("extraction.max_rows", self.max_rows),
            ("extraction.min_page_size", self.min_page_size),
            (
                "extraction.max_consecutive_failures",
                u64::from(self.max_consecutive_failures),
            ),
            ("extraction.write_batch_size", self.write_batch_size as u64),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ValidationError::InvalidFieldValue {
                    field: field.to_string(),
                    constraint: "must be greater than 0".to_string(),
                });
            }
        }

        if self.min_page_size > self.page_size {
            return Err(ValidationError::InvalidFieldValue {
                field: "extraction.min_page_size".to_string(),
                constraint: "must not exceed `extraction.page_size`".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            scroll_page_size: default_scroll_page_size(),
            max_rows: default_max_rows(),
            min_page_size: default_min_page_size(),
            max_consecutive_failures: default_max_consecutive_failures(),
            retry_pause_ms: default_retry_pause_ms(),
            write_batch_size: default_write_batch_size(),
        }
    }
}

fn default_page_size() -> u64 {
    ExtractionConfig::DEFAULT_PAGE_SIZE
}

fn default_scroll_page_size() -> u64 {
    ExtractionConfig::DEFAULT_SCROLL_PAGE_SIZE
}

fn default_max_rows() -> u64 {
    ExtractionConfig::DEFAULT_MAX_ROWS
}

fn default_min_page_size() -> u64 {
    ExtractionConfig::DEFAULT_MIN_PAGE_SIZE
}

fn default_max_consecutive_failures() -> u32 {
    ExtractionConfig::DEFAULT_MAX_CONSECUTIVE_FAILURES
}

fn default_retry_pause_ms() -> u64 {
    ExtractionConfig::DEFAULT_RETRY_PAUSE_MS
}

fn default_write_batch_size() -> usize {
    ExtractionConfig::DEFAULT_WRITE_BATCH_SIZE
}
