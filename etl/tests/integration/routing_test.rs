use etl::destination::memory::MemoryDestination;
use etl::pipeline::{ObjectStatus, Pipeline};
use etl::source::memory::{MemorySource, Record};
use etl::test_utils::records::record;
use etl::types::{Cell, ObjectKind, OrderingType, SourceObject};
use etl_config::shared::{ExtractionConfig, PipelineConfig};
use etl_telemetry::tracing::init_test_tracing;

fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        extraction: ExtractionConfig {
            scroll_page_size: 2,
            retry_pause_ms: 0,
            ..ExtractionConfig::default()
        },
        ..PipelineConfig::default()
    }
}

fn documents(minutes: &[u32]) -> Vec<Record> {
    minutes
        .iter()
        .map(|minute| {
            record([
                (
                    "@timestamp",
                    Cell::String(format!("2024-01-01T00:{minute:02}:00Z")),
                ),
                ("host", Cell::String(format!("node-{minute}"))),
                ("latency.ms", Cell::F64(f64::from(*minute) / 10.0)),
            ])
        })
        .collect()
}

fn perfhist() -> SourceObject {
    SourceObject::new("perfhist-*", ObjectKind::SearchIndex, "opensearch")
        .with_ordering("@timestamp", OrderingType::Timestamp)
        .with_route_keywords(["sms", "nms"])
}

#[tokio::test(flavor = "multi_thread")]
async fn pattern_indices_are_routed_to_their_tables() {
    init_test_tracing();

    let source = MemorySource::new();
    source
        .insert_records("perfhist-sms-2024.01", documents(&[1, 2, 3]))
        .await;
    source
        .insert_records("perfhist-nms-2024.01", documents(&[4, 5]))
        .await;
    source
        .insert_records("perfhist-router-2024.01", documents(&[6]))
        .await;
    source.insert_records("perfhist", documents(&[7])).await;
    source.insert_records("other-sms", documents(&[8])).await;
    let destination = MemoryDestination::new();
    let pipeline = Pipeline::new(pipeline_config(), source.clone(), destination.clone());

    let summary = pipeline.run(vec![perfhist()]).await.unwrap();

    assert_eq!(summary.outcomes.len(), 3);
    assert_eq!(summary.count(ObjectStatus::Succeeded), 3);
    assert_eq!(
        destination.tables().await,
        ["perfhist_nms", "perfhist_router", "perfhist_sms"]
    );
    assert_eq!(destination.table_rows("perfhist_sms").await.len(), 3);
    assert_eq!(source.open_scrolls().await, 0);

    let definition = destination.table_definition("perfhist_sms").await.unwrap();
    let columns: Vec<&str> = definition
        .columns
        .iter()
        .map(|column| column.name.as_str())
        .collect();
    assert!(columns.contains(&"opensearch_timestamp"));
    assert!(columns.contains(&"latency_ms"));
    assert_eq!(definition.order_by, ["opensearch_timestamp"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn index_without_second_segment_lands_in_other() {
    init_test_tracing();

    let source = MemorySource::new();
    source.insert_records("perfhist-", documents(&[1])).await;
    let destination = MemoryDestination::new();
    let pipeline = Pipeline::new(pipeline_config(), source, destination.clone());

    pipeline.run(vec![perfhist()]).await.unwrap();

    assert_eq!(destination.tables().await, ["perfhist_other"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn routed_index_resumes_from_its_table_watermark() {
    init_test_tracing();

    let source = MemorySource::new();
    source
        .insert_records("perfhist-sms-2024.01", documents(&[1, 2, 3]))
        .await;
    let destination = MemoryDestination::new();
    let pipeline = Pipeline::new(pipeline_config(), source.clone(), destination.clone());
    pipeline.run(vec![perfhist()]).await.unwrap();

    source
        .insert_records("perfhist-sms-2024.01", documents(&[4, 5]))
        .await;
    let summary = pipeline.run(vec![perfhist()]).await.unwrap();

    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.destination, "perfhist_sms");
    assert_eq!(outcome.rows_extracted, 2);
    assert_eq!(destination.table_rows("perfhist_sms").await.len(), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn pattern_without_matches_processes_nothing() {
    init_test_tracing();

    let source = MemorySource::new();
    let destination = MemoryDestination::new();
    let pipeline = Pipeline::new(pipeline_config(), source, destination.clone());

    let summary = pipeline.run(vec![perfhist()]).await.unwrap();

    assert!(summary.outcomes.is_empty());
    assert!(destination.tables().await.is_empty());
}
