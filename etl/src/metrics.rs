//! Metrics definitions for sync run monitoring.
//!
//! No exporter is installed here; the embedding binary decides where metrics go.

/// Label for the source object name in metrics.
pub const OBJECT_LABEL: &str = "object";

/// Label for the destination table name in metrics.
pub const DESTINATION_TABLE_LABEL: &str = "destination_table";

/// Label for error kind in metrics.
pub const ERROR_KIND_LABEL: &str = "error_kind";

/// Label for the final status of an object.
pub const STATUS_LABEL: &str = "status";

// Extraction metrics

/// Counter for rows pulled from sources.
pub const ETL_ROWS_EXTRACTED_TOTAL: &str = "etl_rows_extracted_total";

/// Counter for page cycles that ended without data after their retry.
pub const ETL_PAGE_FAILURES_TOTAL: &str = "etl_page_failures_total";

/// Counter for page size reductions triggered by resource exhaustion.
pub const ETL_PAGE_SIZE_REDUCTIONS_TOTAL: &str = "etl_page_size_reductions_total";

// Load metrics

/// Counter for rows appended to destinations.
pub const ETL_ROWS_LOADED_TOTAL: &str = "etl_rows_loaded_total";

/// Counter for write chunks a destination rejected.
pub const ETL_LOAD_FAILURES_TOTAL: &str = "etl_load_failures_total";

/// Counter for columns the reconciler could not add.
pub const ETL_REJECTED_COLUMNS_TOTAL: &str = "etl_rejected_columns_total";

// Run metrics

/// Counter for processed objects, labelled by status.
pub const ETL_OBJECTS_PROCESSED_TOTAL: &str = "etl_objects_processed_total";

/// Histogram for the wall-clock duration of processing one object.
pub const ETL_OBJECT_DURATION_SECONDS: &str = "etl_object_duration_seconds";
