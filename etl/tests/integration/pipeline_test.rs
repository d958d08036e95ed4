use chrono::Duration;
use etl::destination::memory::MemoryDestination;
use etl::error::ErrorKind;
use etl::pipeline::{ObjectStatus, Pipeline};
use etl::source::memory::MemorySource;
use etl::test_utils::faulty_source::FaultySource;
use etl::test_utils::records::{midnight, order_records, record};
use etl::test_utils::test_destination_wrapper::TestDestinationWrapper;
use etl::transform::{SOURCE_OBJECT_COLUMN, SOURCE_SYSTEM_COLUMN};
use etl::types::{Cell, ObjectKind, OrderingType, SourceObject};
use etl_config::shared::{ExtractionConfig, PipelineConfig};
use etl_telemetry::tracing::init_test_tracing;

fn pipeline_config(page_size: u64, max_rows: u64) -> PipelineConfig {
    PipelineConfig {
        extraction: ExtractionConfig {
            page_size,
            max_rows,
            retry_pause_ms: 0,
            ..ExtractionConfig::default()
        },
        ..PipelineConfig::default()
    }
}

fn orders() -> SourceObject {
    SourceObject::new("orders", ObjectKind::Relational, "guava")
        .with_ordering("updated_at", OrderingType::Timestamp)
}

fn ids(values: Vec<Cell>) -> Vec<i64> {
    values
        .into_iter()
        .map(|cell| match cell {
            Cell::I64(id) => id,
            Cell::I32(id) => i64::from(id),
            other => panic!("unexpected id cell {other:?}"),
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn capped_run_loads_the_cap_and_resumes_on_the_next_run() {
    init_test_tracing();

    let source = MemorySource::new();
    source
        .insert_records("orders", order_records(1, 150_000, midnight(2023, 1, 1)))
        .await;
    let destination = MemoryDestination::new();
    let object = SourceObject::new("orders", ObjectKind::Relational, "guava")
        .with_ordering("id", OrderingType::MonotonicSequence);

    let pipeline = Pipeline::new(
        pipeline_config(1000, 100_000),
        source.clone(),
        destination.clone(),
    );

    let summary = pipeline.run(vec![object.clone()]).await.unwrap();

    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.status, ObjectStatus::Capped);
    assert_eq!(outcome.rows_extracted, 100_000);
    assert_eq!(outcome.rows_loaded, 100_000);
    assert_eq!(outcome.final_row_count, Some(100_000));
    assert_eq!(destination.table_rows("orders").await.len(), 100_000);
    assert!(!summary.has_failures());

    let summary = pipeline.run(vec![object]).await.unwrap();

    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.status, ObjectStatus::Succeeded);
    assert_eq!(outcome.rows_loaded, 50_000);
    assert_eq!(outcome.final_row_count, Some(150_000));
}

#[tokio::test(flavor = "multi_thread")]
async fn second_run_only_loads_records_past_the_watermark() {
    init_test_tracing();

    let source = MemorySource::new();
    let first_run_start = midnight(2024, 1, 1) - Duration::minutes(9);
    source
        .insert_records("orders", order_records(1, 10, first_run_start))
        .await;
    let destination = MemoryDestination::new();
    let pipeline = Pipeline::new(
        pipeline_config(500, 100_000),
        source.clone(),
        destination.clone(),
    );

    let summary = pipeline.run(vec![orders()]).await.unwrap();
    assert_eq!(summary.outcomes[0].status, ObjectStatus::Succeeded);
    assert_eq!(summary.outcomes[0].rows_loaded, 10);

    source
        .insert_records(
            "orders",
            order_records(11, 5, midnight(2024, 1, 1) + Duration::minutes(1)),
        )
        .await;

    let summary = pipeline.run(vec![orders()]).await.unwrap();

    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.status, ObjectStatus::Succeeded);
    assert_eq!(outcome.rows_extracted, 5);
    assert_eq!(outcome.rows_loaded, 5);
    assert_eq!(outcome.final_row_count, Some(15));
    assert_eq!(
        ids(destination.column_values("orders", "id").await),
        (1..=15).collect::<Vec<_>>()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unchanged_source_loads_nothing() {
    init_test_tracing();

    let source = MemorySource::new();
    source
        .insert_records("orders", order_records(1, 10, midnight(2024, 1, 1)))
        .await;
    let destination = TestDestinationWrapper::wrap(MemoryDestination::new());
    let pipeline = Pipeline::new(pipeline_config(500, 100_000), source, destination.clone());

    pipeline.run(vec![orders()]).await.unwrap();
    let appends = destination.append_calls().await;

    let summary = pipeline.run(vec![orders()]).await.unwrap();

    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.status, ObjectStatus::Succeeded);
    assert_eq!(outcome.rows_extracted, 0);
    assert_eq!(outcome.final_row_count, None);
    assert_eq!(destination.append_calls().await, appends);
}

#[tokio::test(flavor = "multi_thread")]
async fn degraded_pages_end_the_object_as_partial() {
    init_test_tracing();

    let memory = MemorySource::new();
    memory
        .insert_records("orders", order_records(1, 2000, midnight(2024, 1, 1)))
        .await;
    let source = FaultySource::wrap(memory);
    source
        .fail_from_offset(1000, ErrorKind::SourceResourceExhausted)
        .await;
    let destination = MemoryDestination::new();
    let pipeline = Pipeline::new(
        pipeline_config(500, 100_000),
        source.clone(),
        destination.clone(),
    );

    let summary = pipeline.run(vec![orders()]).await.unwrap();

    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.status, ObjectStatus::Partial);
    assert_eq!(outcome.rows_loaded, 1000);
    assert_eq!(destination.table_rows("orders").await.len(), 1000);
    assert!(!summary.has_failures());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_write_batch_is_lost_and_the_object_is_partial() {
    init_test_tracing();

    let source = MemorySource::new();
    source
        .insert_records("orders", order_records(1, 10, midnight(2024, 1, 1)))
        .await;
    let destination = TestDestinationWrapper::wrap(MemoryDestination::new());
    destination.fail_appends(1).await;
    let pipeline = Pipeline::new(pipeline_config(5, 100_000), source, destination.clone());

    let summary = pipeline.run(vec![orders()]).await.unwrap();

    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.status, ObjectStatus::Partial);
    assert_eq!(outcome.rows_extracted, 10);
    assert_eq!(outcome.rows_loaded, 5);
    assert_eq!(
        ids(destination.wrapped().column_values("orders", "id").await),
        [6, 7, 8, 9, 10]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn keyed_object_collapses_to_the_latest_version() {
    init_test_tracing();

    let source = MemorySource::new();
    source
        .insert_records(
            "accounts",
            [
                record([
                    ("id", Cell::I64(1)),
                    ("updated_at", Cell::Timestamp(midnight(2024, 1, 1))),
                    ("balance", Cell::F64(10.0)),
                ]),
                record([
                    ("id", Cell::I64(2)),
                    ("updated_at", Cell::Timestamp(midnight(2024, 1, 2))),
                    ("balance", Cell::F64(20.0)),
                ]),
            ],
        )
        .await;
    let destination = TestDestinationWrapper::wrap(MemoryDestination::new());
    let object = SourceObject::new("accounts", ObjectKind::Relational, "guava")
        .with_ordering("updated_at", OrderingType::Timestamp)
        .with_key_columns(["id"]);
    let pipeline = Pipeline::new(
        pipeline_config(500, 100_000),
        source.clone(),
        destination.clone(),
    );

    pipeline.run(vec![object.clone()]).await.unwrap();

    source
        .insert_records(
            "accounts",
            [record([
                ("id", Cell::I64(1)),
                ("updated_at", Cell::Timestamp(midnight(2024, 1, 3))),
                ("balance", Cell::F64(15.0)),
            ])],
        )
        .await;

    let summary = pipeline.run(vec![object]).await.unwrap();

    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.status, ObjectStatus::Succeeded);
    assert_eq!(outcome.rows_loaded, 1);
    assert_eq!(outcome.final_row_count, Some(2));
    assert_eq!(
        destination.compacted_tables().await,
        ["accounts", "accounts"]
    );

    let balances = destination.wrapped().column_values("accounts", "balance").await;
    assert!(balances.contains(&Cell::F64(15.0)));
    assert!(!balances.contains(&Cell::F64(10.0)));

    let definition = destination.wrapped().table_definition("accounts").await.unwrap();
    assert!(!definition.columns.iter().any(|column| column.name == SOURCE_SYSTEM_COLUMN));
}

#[tokio::test(flavor = "multi_thread")]
async fn unkeyed_object_rows_carry_provenance() {
    init_test_tracing();

    let source = MemorySource::new();
    source
        .insert_records("orders", order_records(1, 3, midnight(2024, 1, 1)))
        .await;
    let destination = MemoryDestination::new();
    let pipeline = Pipeline::new(pipeline_config(500, 100_000), source, destination.clone());

    pipeline.run(vec![orders()]).await.unwrap();

    assert_eq!(
        destination.column_values("orders", SOURCE_SYSTEM_COLUMN).await,
        vec![Cell::String("guava".to_owned()); 3]
    );
    assert_eq!(
        destination.column_values("orders", SOURCE_OBJECT_COLUMN).await,
        vec![Cell::String("orders".to_owned()); 3]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn compaction_failure_makes_the_object_partial() {
    init_test_tracing();

    let source = MemorySource::new();
    source
        .insert_records("orders", order_records(1, 10, midnight(2024, 1, 1)))
        .await;
    let destination = TestDestinationWrapper::wrap(MemoryDestination::new());
    destination.fail_compaction().await;
    let object = orders().with_key_columns(["id"]);
    let pipeline = Pipeline::new(pipeline_config(500, 100_000), source, destination.clone());

    let summary = pipeline.run(vec![object]).await.unwrap();

    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.status, ObjectStatus::Partial);
    assert_eq!(outcome.rows_loaded, 10);
    assert_eq!(outcome.final_row_count, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_watermark_lookup_falls_back_to_full_extraction() {
    init_test_tracing();

    let source = MemorySource::new();
    source
        .insert_records("orders", order_records(1, 10, midnight(2024, 1, 1)))
        .await;
    let destination = TestDestinationWrapper::wrap(MemoryDestination::new());
    let pipeline = Pipeline::new(pipeline_config(500, 100_000), source, destination.clone());
    pipeline.run(vec![orders()]).await.unwrap();

    destination.fail_lookups().await;
    let summary = pipeline.run(vec![orders()]).await.unwrap();

    // The row count lookup fails as well, so the object cannot be confirmed.
    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.rows_extracted, 10);
    assert_eq!(outcome.rows_loaded, 10);
    assert_eq!(outcome.status, ObjectStatus::Partial);
    assert_eq!(destination.wrapped().table_rows("orders").await.len(), 20);
}

#[tokio::test(flavor = "multi_thread")]
async fn mismatched_watermark_skips_the_object() {
    init_test_tracing();

    let source = MemorySource::new();
    source
        .insert_records("orders", order_records(1, 10, midnight(2024, 1, 1)))
        .await;
    let destination = MemoryDestination::new();
    let pipeline = Pipeline::new(pipeline_config(500, 100_000), source, destination.clone());
    pipeline.run(vec![orders()]).await.unwrap();

    let object = SourceObject::new("orders", ObjectKind::Relational, "guava")
        .with_ordering("updated_at", OrderingType::MonotonicSequence);
    let summary = pipeline.run(vec![object]).await.unwrap();

    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.status, ObjectStatus::Skipped);
    assert_eq!(
        outcome.error.as_ref().map(|err| err.kind()),
        Some(ErrorKind::FilterBuildFailed)
    );
    assert_eq!(outcome.rows_extracted, 0);
    assert_eq!(destination.table_rows("orders").await.len(), 10);
    assert!(!summary.has_failures());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_object_does_not_stop_the_others() {
    init_test_tracing();

    let memory = MemorySource::new();
    memory
        .insert_records("orders", order_records(1, 10, midnight(2024, 1, 1)))
        .await;
    memory
        .insert_records("invoices", order_records(1, 4, midnight(2024, 1, 1)))
        .await;
    let source = FaultySource::wrap(memory);
    let destination = MemoryDestination::new();
    let pipeline = Pipeline::new(pipeline_config(500, 100_000), source, destination.clone());

    let missing = SourceObject::new("missing", ObjectKind::Relational, "guava");
    let invoices = SourceObject::new("invoices", ObjectKind::Relational, "guava")
        .with_ordering("updated_at", OrderingType::Timestamp);

    let summary = pipeline
        .run(vec![orders(), missing, invoices])
        .await
        .unwrap();

    let statuses: Vec<ObjectStatus> = summary.outcomes.iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        [
            ObjectStatus::Succeeded,
            ObjectStatus::Failed,
            ObjectStatus::Succeeded
        ]
    );
    assert!(summary.has_failures());
    assert_eq!(summary.rows_loaded(), 14);
    assert_eq!(destination.tables().await, ["invoices", "orders"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_row_count_fails_the_object() {
    init_test_tracing();

    let memory = MemorySource::new();
    memory
        .insert_records("orders", order_records(1, 10, midnight(2024, 1, 1)))
        .await;
    let source = FaultySource::wrap(memory);
    source.fail_count().await;
    let pipeline = Pipeline::new(
        pipeline_config(500, 100_000),
        source,
        MemoryDestination::new(),
    );

    let summary = pipeline.run(vec![orders()]).await.unwrap();

    assert_eq!(summary.outcomes[0].status, ObjectStatus::Failed);
    assert_eq!(
        summary.outcomes[0].error.as_ref().map(|err| err.kind()),
        Some(ErrorKind::SourceQueryFailed)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_destination_aborts_the_run() {
    init_test_tracing();

    let source = FaultySource::wrap(MemorySource::new());
    let destination = TestDestinationWrapper::wrap(MemoryDestination::new());
    destination.make_unreachable().await;
    let pipeline = Pipeline::new(pipeline_config(500, 100_000), source.clone(), destination);

    let err = pipeline.run(vec![orders()]).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationConnectionFailed);
    assert_eq!(source.connections().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn connections_are_released_after_each_object() {
    init_test_tracing();

    let memory = MemorySource::new();
    memory
        .insert_records("orders", order_records(1, 10, midnight(2024, 1, 1)))
        .await;
    let source = FaultySource::wrap(memory);
    let destination = TestDestinationWrapper::wrap(MemoryDestination::new());
    let pipeline = Pipeline::new(
        pipeline_config(500, 100_000),
        source.clone(),
        destination.clone(),
    );

    let missing = SourceObject::new("missing", ObjectKind::Relational, "guava");
    pipeline.run(vec![orders(), missing]).await.unwrap();

    assert_eq!(source.connections().await, 2);
    assert_eq!(source.shutdown_calls().await, 2);
    // One extra connection checks the destination before the run.
    assert_eq!(destination.connections().await, 3);
    assert_eq!(destination.shutdown_calls().await, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn objects_sharing_a_table_are_loaded_one_after_the_other() {
    init_test_tracing();

    let source = MemorySource::new();
    source
        .insert_records("orders_eu", order_records(1, 6, midnight(2024, 1, 1)))
        .await;
    source
        .insert_records("orders_us", order_records(100, 4, midnight(2024, 1, 1)))
        .await;
    source
        .insert_records("refunds", order_records(1, 3, midnight(2024, 1, 1)))
        .await;
    let destination = MemoryDestination::new();
    let mut config = pipeline_config(2, 100_000);
    config.max_concurrent_objects = 2;
    let pipeline = Pipeline::new(config, source, destination.clone());

    let objects = vec![
        SourceObject::new("orders_eu", ObjectKind::Relational, "eu").with_destination("orders"),
        SourceObject::new("refunds", ObjectKind::Relational, "eu"),
        SourceObject::new("orders_us", ObjectKind::Relational, "us").with_destination("orders"),
    ];

    let summary = pipeline.run(objects).await.unwrap();

    let names: Vec<&str> = summary.outcomes.iter().map(|o| o.object.as_str()).collect();
    assert_eq!(names, ["orders_eu", "orders_us", "refunds"]);
    assert_eq!(summary.count(ObjectStatus::Succeeded), 3);
    assert_eq!(destination.table_rows("orders").await.len(), 10);
    assert_eq!(destination.table_rows("refunds").await.len(), 3);

    let systems = destination.column_values("orders", SOURCE_SYSTEM_COLUMN).await;
    assert_eq!(
        systems
            .iter()
            .filter(|cell| **cell == Cell::String("us".to_owned()))
            .count(),
        4
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn columnar_table_is_created_from_the_source_definition() {
    init_test_tracing();

    let statement = "CREATE TABLE metrics.samples (`id` Int64) ENGINE = MergeTree ORDER BY id";
    let source = MemorySource::new();
    source
        .insert_records("samples", order_records(1, 3, midnight(2024, 1, 1)))
        .await;
    source.set_create_statement("samples", statement).await;
    let destination = MemoryDestination::new();
    let object = SourceObject::new("samples", ObjectKind::Columnar, "metrics")
        .with_destination("metrics_samples")
        .with_ordering("id", OrderingType::MonotonicSequence);

    let pipeline = Pipeline::new(pipeline_config(1000, 100_000), source, destination.clone());
    let summary = pipeline.run(vec![object]).await.unwrap();

    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.status, ObjectStatus::Succeeded);
    assert_eq!(outcome.rows_loaded, 3);
    assert_eq!(
        destination.create_statement("metrics_samples").await.as_deref(),
        Some(statement)
    );
    assert_eq!(ids(destination.column_values("metrics_samples", "id").await), [1, 2, 3]);
}
