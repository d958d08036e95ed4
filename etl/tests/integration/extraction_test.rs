use etl::error::ErrorKind;
use etl::extract::{ExtractionOptions, ExtractionStatus, Extractor};
use etl::filter::Predicate;
use etl::source::memory::MemorySource;
use etl::test_utils::faulty_source::FaultySource;
use etl::test_utils::records::{midnight, order_records, record};
use etl::types::{Cell, ObjectKind, OrderingType, SourceObject};
use etl_telemetry::tracing::init_test_tracing;
use std::time::Duration;

fn options(page_size: u64, max_rows: u64, min_page_size: u64) -> ExtractionOptions {
    ExtractionOptions {
        page_size,
        scroll_page_size: page_size,
        max_rows,
        min_page_size,
        max_consecutive_failures: 3,
        retry_pause: Duration::ZERO,
    }
}

fn orders() -> SourceObject {
    SourceObject::new("orders", ObjectKind::Relational, "guava")
        .with_ordering("updated_at", OrderingType::Timestamp)
}

async fn drain<S>(extractor: &mut Extractor<'_, S>) -> Vec<usize>
where
    S: etl::source::Source + Sync,
{
    let mut sizes = Vec::new();
    while let Some(batch) = extractor.next_batch().await.unwrap() {
        sizes.push(batch.len());
    }
    sizes
}

#[tokio::test(flavor = "multi_thread")]
async fn offset_extraction_never_exceeds_the_row_cap() {
    init_test_tracing();

    for rows in [0, 1, 99, 100, 101, 250] {
        let source = MemorySource::new();
        source.create_object("orders").await;
        source
            .insert_records("orders", order_records(1, rows, midnight(2024, 1, 1)))
            .await;
        let object = orders();

        let mut extractor =
            Extractor::start(&source, &object, &Predicate::All, options(30, 100, 10))
                .await
                .unwrap();
        let extracted: usize = drain(&mut extractor).await.into_iter().sum();
        let report = extractor.finish().await;

        assert_eq!(extracted, rows.min(100), "rows = {rows}");
        assert_eq!(report.rows_extracted, rows.min(100) as u64);
        let expected = if rows > 100 {
            ExtractionStatus::Capped
        } else {
            ExtractionStatus::Complete
        };
        assert_eq!(report.status, expected, "rows = {rows}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn scroll_extraction_trims_the_page_crossing_the_cap() {
    init_test_tracing();

    let source = MemorySource::new();
    source
        .insert_records("logs-2024.01", order_records(1, 250, midnight(2024, 1, 1)))
        .await;
    let object = SourceObject::new("logs-2024.01", ObjectKind::SearchIndex, "opensearch")
        .with_ordering("updated_at", OrderingType::Timestamp);

    let mut extractor = Extractor::start(&source, &object, &Predicate::All, options(60, 100, 10))
        .await
        .unwrap();
    let sizes = drain(&mut extractor).await;
    let report = extractor.finish().await;

    assert_eq!(sizes, [60, 40]);
    assert_eq!(report.status, ExtractionStatus::Capped);
    assert_eq!(source.open_scrolls().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn scroll_is_cleared_when_extraction_is_abandoned() {
    init_test_tracing();

    let source = MemorySource::new();
    source
        .insert_records("logs-2024.01", order_records(1, 50, midnight(2024, 1, 1)))
        .await;
    let object = SourceObject::new("logs-2024.01", ObjectKind::SearchIndex, "opensearch")
        .with_ordering("updated_at", OrderingType::Timestamp);

    let mut extractor = Extractor::start(&source, &object, &Predicate::All, options(10, 1000, 10))
        .await
        .unwrap();
    let first = extractor.next_batch().await.unwrap().unwrap();
    assert_eq!(first.len(), 10);
    assert_eq!(source.open_scrolls().await, 1);

    extractor.finish().await;

    assert_eq!(source.open_scrolls().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_page_is_retried_at_half_size() {
    init_test_tracing();

    let memory = MemorySource::new();
    memory
        .insert_records("orders", order_records(1, 1000, midnight(2024, 1, 1)))
        .await;
    let source = FaultySource::wrap(memory);
    source.exhaust_above(250).await;
    let object = orders();

    let mut extractor =
        Extractor::start(&source, &object, &Predicate::All, options(500, 100_000, 100))
            .await
            .unwrap();
    let sizes = drain(&mut extractor).await;
    let report = extractor.finish().await;

    assert_eq!(sizes, [250, 250, 250, 250]);
    assert_eq!(
        source.fetch_calls().await,
        [(500, 0), (250, 0), (250, 250), (250, 500), (250, 750)]
    );
    assert_eq!(report.status, ExtractionStatus::Complete);
    assert_eq!(report.pages_skipped, 0);
    assert_eq!(report.final_page_size, 250);
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_exhaustion_skips_pages_and_stops() {
    init_test_tracing();

    let memory = MemorySource::new();
    memory
        .insert_records("orders", order_records(1, 2000, midnight(2024, 1, 1)))
        .await;
    let source = FaultySource::wrap(memory);
    source
        .fail_from_offset(1000, ErrorKind::SourceResourceExhausted)
        .await;
    let object = orders();

    let mut extractor =
        Extractor::start(&source, &object, &Predicate::All, options(500, 100_000, 100))
            .await
            .unwrap();
    let sizes = drain(&mut extractor).await;
    let report = extractor.finish().await;

    assert_eq!(sizes, [500, 500]);
    assert_eq!(
        source.fetch_calls().await,
        [
            (500, 0),
            (500, 500),
            (500, 1000),
            (250, 1000),
            (250, 1250),
            (125, 1250),
            (125, 1375),
            (100, 1375),
        ]
    );
    assert_eq!(report.status, ExtractionStatus::Partial);
    assert_eq!(report.rows_extracted, 1000);
    assert_eq!(report.pages_skipped, 3);
    assert_eq!(report.final_page_size, 100);
}

#[tokio::test(flavor = "multi_thread")]
async fn permanent_exhaustion_terminates_without_rows() {
    init_test_tracing();

    let memory = MemorySource::new();
    memory
        .insert_records("orders", order_records(1, 300, midnight(2024, 1, 1)))
        .await;
    let source = FaultySource::wrap(memory);
    source.exhaust_above(0).await;
    let object = orders();

    let mut extractor =
        Extractor::start(&source, &object, &Predicate::All, options(100, 100_000, 25))
            .await
            .unwrap();
    let sizes = drain(&mut extractor).await;
    let report = extractor.finish().await;

    assert!(sizes.is_empty());
    assert_eq!(source.fetch_calls().await.len(), 6);
    assert_eq!(report.status, ExtractionStatus::Partial);
    assert_eq!(report.rows_extracted, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_failure_is_retried_at_the_same_size() {
    init_test_tracing();

    let memory = MemorySource::new();
    memory
        .insert_records("orders", order_records(1, 20, midnight(2024, 1, 1)))
        .await;
    let source = FaultySource::wrap(memory);
    source
        .fail_next_fetches(ErrorKind::SourceQueryFailed, 1)
        .await;
    let object = orders();

    let mut extractor = Extractor::start(&source, &object, &Predicate::All, options(10, 100_000, 5))
        .await
        .unwrap();
    let sizes = drain(&mut extractor).await;
    let report = extractor.finish().await;

    assert_eq!(sizes, [10, 10]);
    assert_eq!(
        source.fetch_calls().await,
        [(10, 0), (10, 0), (10, 10)]
    );
    assert_eq!(report.status, ExtractionStatus::Complete);
}

#[tokio::test(flavor = "multi_thread")]
async fn predicate_limits_extraction_to_newer_records() {
    init_test_tracing();

    let source = MemorySource::new();
    source
        .insert_records(
            "orders",
            [
                record([("id", Cell::I64(1)), ("seq", Cell::I64(5))]),
                record([("id", Cell::I64(2)), ("seq", Cell::I64(10))]),
                record([("id", Cell::I64(3)), ("seq", Cell::I64(15))]),
            ],
        )
        .await;
    let object = SourceObject::new("orders", ObjectKind::Relational, "guava")
        .with_ordering("seq", OrderingType::MonotonicSequence);
    let ordering = object.ordering.clone().unwrap();
    let predicate =
        etl::filter::build_filter(&ordering, &etl::types::Watermark::NumericEpoch(5)).unwrap();

    let mut extractor = Extractor::start(&source, &object, &predicate, options(10, 100, 1))
        .await
        .unwrap();
    let sizes = drain(&mut extractor).await;
    let report = extractor.finish().await;

    assert_eq!(sizes, [2]);
    assert_eq!(report.rows_matched, Some(2));
}
