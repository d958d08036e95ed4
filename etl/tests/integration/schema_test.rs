use chrono::Duration;
use etl::destination::memory::MemoryDestination;
use etl::pipeline::{ObjectStatus, Pipeline};
use etl::source::memory::{MemorySource, Record};
use etl::test_utils::records::{midnight, order_records, record};
use etl::test_utils::test_destination_wrapper::TestDestinationWrapper;
use etl::types::{Cell, ColumnSchema, ColumnType, ObjectKind, OrderingType, SourceObject};
use etl_config::shared::{ExtractionConfig, PipelineConfig};
use etl_telemetry::tracing::init_test_tracing;

fn pipeline_config(page_size: u64) -> PipelineConfig {
    PipelineConfig {
        extraction: ExtractionConfig {
            page_size,
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

/// Order records past the first ten, carrying an extra boolean field.
fn flagged_records(count: usize) -> Vec<Record> {
    order_records(11, count, midnight(2024, 1, 2))
        .into_iter()
        .enumerate()
        .map(|(index, mut record)| {
            record.push(("extra_flag".to_owned(), Cell::Bool(index % 2 == 0)));
            record
        })
        .collect()
}

async fn seeded_source() -> MemorySource {
    let source = MemorySource::new();
    source
        .insert_records("orders", order_records(1, 10, midnight(2024, 1, 1)))
        .await;
    source
}

#[tokio::test(flavor = "multi_thread")]
async fn new_field_is_added_once_as_nullable_text() {
    init_test_tracing();

    let source = seeded_source().await;
    let destination = TestDestinationWrapper::wrap(MemoryDestination::new());
    let pipeline = Pipeline::new(pipeline_config(5), source.clone(), destination.clone());
    pipeline.run(vec![orders()]).await.unwrap();
    assert!(destination.added_columns().await.is_empty());

    source.insert_records("orders", flagged_records(10)).await;
    let summary = pipeline.run(vec![orders()]).await.unwrap();

    assert_eq!(summary.outcomes[0].status, ObjectStatus::Succeeded);
    assert_eq!(summary.outcomes[0].rows_loaded, 10);
    assert_eq!(
        destination.added_columns().await,
        [(
            "orders".to_owned(),
            ColumnSchema::new("extra_flag", ColumnType::Text, true)
        )]
    );

    let flags = destination
        .wrapped()
        .column_values("orders", "extra_flag")
        .await;
    assert_eq!(flags.len(), 20);
    assert!(flags[..10].iter().all(Cell::is_null));
    assert_eq!(flags[10], Cell::String("true".to_owned()));
    assert_eq!(flags[11], Cell::String("false".to_owned()));
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_column_is_dropped_and_the_rest_loads() {
    init_test_tracing();

    let source = seeded_source().await;
    let destination = TestDestinationWrapper::wrap(MemoryDestination::new());
    let pipeline = Pipeline::new(pipeline_config(500), source.clone(), destination.clone());
    pipeline.run(vec![orders()]).await.unwrap();

    destination.reject_column("extra_flag").await;
    source.insert_records("orders", flagged_records(4)).await;
    let summary = pipeline.run(vec![orders()]).await.unwrap();

    assert_eq!(summary.outcomes[0].status, ObjectStatus::Succeeded);
    assert_eq!(summary.outcomes[0].rows_loaded, 4);
    let definition = destination
        .wrapped()
        .table_definition("orders")
        .await
        .unwrap();
    assert!(!definition.columns.iter().any(|column| column.name == "extra_flag"));
    assert_eq!(destination.wrapped().table_rows("orders").await.len(), 14);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrently_added_column_is_accepted() {
    init_test_tracing();

    let source = seeded_source().await;
    let destination = TestDestinationWrapper::wrap(MemoryDestination::new());
    let pipeline = Pipeline::new(pipeline_config(500), source.clone(), destination.clone());
    pipeline.run(vec![orders()]).await.unwrap();

    destination.race_column("extra_flag").await;
    source.insert_records("orders", flagged_records(4)).await;
    let summary = pipeline.run(vec![orders()]).await.unwrap();

    assert_eq!(summary.outcomes[0].status, ObjectStatus::Succeeded);
    let flags = destination
        .wrapped()
        .column_values("orders", "extra_flag")
        .await;
    assert_eq!(flags.len(), 14);
    assert_eq!(flags[10], Cell::String("true".to_owned()));
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrently_created_table_is_reused() {
    init_test_tracing();

    let source = seeded_source().await;
    let destination = TestDestinationWrapper::wrap(MemoryDestination::new());
    destination.race_table_creation().await;
    let pipeline = Pipeline::new(pipeline_config(500), source, destination.clone());

    let summary = pipeline.run(vec![orders()]).await.unwrap();

    assert_eq!(summary.outcomes[0].status, ObjectStatus::Succeeded);
    assert!(destination.created_tables().await.is_empty());
    assert_eq!(destination.wrapped().table_rows("orders").await.len(), 10);
}

#[tokio::test(flavor = "multi_thread")]
async fn created_table_orders_by_the_ordering_column() {
    init_test_tracing();

    let source = seeded_source().await;
    let destination = TestDestinationWrapper::wrap(MemoryDestination::new());
    let pipeline = Pipeline::new(pipeline_config(500), source, destination.clone());

    pipeline.run(vec![orders()]).await.unwrap();

    let created = destination.created_tables().await;
    assert_eq!(created.len(), 1);
    let definition = &created[0];
    assert_eq!(definition.order_by, ["updated_at"]);
    let ordering = definition
        .columns
        .iter()
        .find(|column| column.name == "updated_at")
        .unwrap();
    assert_eq!(ordering.typ, ColumnType::Timestamp);
    assert!(!ordering.nullable);
}

#[tokio::test(flavor = "multi_thread")]
async fn reconciliation_is_idempotent_across_runs() {
    init_test_tracing();

    let source = seeded_source().await;
    let destination = TestDestinationWrapper::wrap(MemoryDestination::new());
    let pipeline = Pipeline::new(pipeline_config(3), source.clone(), destination.clone());
    pipeline.run(vec![orders()]).await.unwrap();

    source
        .insert_records(
            "orders",
            order_records(11, 7, midnight(2024, 1, 1) + Duration::hours(1)),
        )
        .await;
    pipeline.run(vec![orders()]).await.unwrap();

    assert_eq!(destination.created_tables().await.len(), 1);
    assert!(destination.added_columns().await.is_empty());
    assert_eq!(destination.wrapped().table_rows("orders").await.len(), 17);
}

#[tokio::test(flavor = "multi_thread")]
async fn column_reported_as_existing_but_missing_is_dropped() {
    init_test_tracing();

    let source = seeded_source().await;
    let destination = TestDestinationWrapper::wrap(MemoryDestination::new());
    let pipeline = Pipeline::new(pipeline_config(500), source.clone(), destination.clone());
    pipeline.run(vec![orders()]).await.unwrap();

    destination.misreport_column_as_existing("extra_flag").await;
    source.insert_records("orders", flagged_records(4)).await;
    let summary = pipeline.run(vec![orders()]).await.unwrap();

    assert_eq!(summary.outcomes[0].status, ObjectStatus::Succeeded);
    assert_eq!(summary.outcomes[0].rows_loaded, 4);
    let definition = destination
        .wrapped()
        .table_definition("orders")
        .await
        .unwrap();
    assert!(!definition.columns.iter().any(|column| column.name == "extra_flag"));
    assert_eq!(destination.wrapped().table_rows("orders").await.len(), 14);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_key_columns_fall_back_to_identifier_columns() {
    init_test_tracing();

    let source = seeded_source().await;
    source
        .insert_records(
            "accounts",
            vec![
                record([
                    ("account_id", Cell::I64(1)),
                    ("owner_id", Cell::I64(7)),
                    ("name", Cell::String("first".to_owned())),
                ]),
                record([
                    ("account_id", Cell::I64(1)),
                    ("owner_id", Cell::I64(7)),
                    ("name", Cell::String("renamed".to_owned())),
                ]),
            ],
        )
        .await;
    let destination = TestDestinationWrapper::wrap(MemoryDestination::new());
    let pipeline = Pipeline::new(pipeline_config(500), source, destination.clone());
    let accounts = SourceObject::new("accounts", ObjectKind::Relational, "guava")
        .with_key_columns(["uuid"]);

    let summary = pipeline.run(vec![accounts]).await.unwrap();

    assert_eq!(summary.outcomes[0].status, ObjectStatus::Succeeded);
    let created = destination.created_tables().await;
    assert_eq!(created[0].order_by, ["account_id", "owner_id"]);
    assert_eq!(summary.outcomes[0].final_row_count, Some(1));
    assert_eq!(
        destination.wrapped().column_values("accounts", "name").await,
        [Cell::String("renamed".to_owned())]
    );
}
