#![cfg(all(feature = "mysql", feature = "test-utils"))]

use etl::destination::memory::MemoryDestination;
use etl::error::ErrorKind;
use etl::filter::{Predicate, PredicateValue};
use etl::pipeline::{ObjectStatus, Pipeline};
use etl::connector::SourceConnector;
use etl::source::Source;
use etl::types::{Cell, ObjectKind, OrderingType, SourceObject};
use etl_config::shared::{ExtractionConfig, PipelineConfig};
use etl_connectors::mysql::test_utils::{setup_mysql_database, skip_if_missing_mysql_env_vars};
use etl_telemetry::tracing::init_test_tracing;

fn orders() -> SourceObject {
    SourceObject::new("orders", ObjectKind::Relational, "guava")
        .with_ordering("order_id", OrderingType::MonotonicSequence)
}

#[tokio::test(flavor = "multi_thread")]
async fn pages_are_decoded_with_column_types() {
    if skip_if_missing_mysql_env_vars() {
        return;
    }

    init_test_tracing();

    let database = setup_mysql_database().await;
    database
        .execute(
            "CREATE TABLE orders (
                order_id BIGINT UNSIGNED NOT NULL PRIMARY KEY,
                quantity INT NOT NULL,
                price DOUBLE,
                amount DECIMAL(10, 2),
                note VARCHAR(64),
                updated_at DATETIME(6) NOT NULL
            )",
        )
        .await;
    database
        .execute(
            "INSERT INTO orders VALUES
                (1, 2, 9.5, 19.00, 'first', '2024-01-01 10:00:00.250000'),
                (2, 1, NULL, 3.10, NULL, '2024-01-01 11:00:00'),
                (3, 7, 1.25, 8.75, 'third', '2024-01-02 09:30:00')",
        )
        .await;

    let source = database.connector().connect().await.unwrap();
    let predicate = Predicate::GreaterThan {
        column: "order_id".to_owned(),
        value: PredicateValue::Integer(1),
    };

    assert_eq!(source.count_rows(&orders(), &predicate).await.unwrap(), 2);

    let batch = source.fetch_page(&orders(), &predicate, 10, 0).await.unwrap();
    let names: Vec<&str> = batch.column_names().collect();
    assert_eq!(
        names,
        ["order_id", "quantity", "price", "amount", "note", "updated_at"]
    );
    assert_eq!(batch.len(), 2);
    let first = batch.rows()[0].values();
    assert_eq!(first[0], Cell::U64(2));
    assert_eq!(first[1], Cell::I32(1));
    assert_eq!(first[2], Cell::Null);
    assert_eq!(first[3], Cell::String("3.10".to_owned()));
    assert!(matches!(first[5], Cell::Timestamp(_)));

    let page = source.fetch_page(&orders(), &predicate, 1, 1).await.unwrap();
    assert_eq!(page.rows()[0].values()[0], Cell::U64(3));

    assert_eq!(source.list_objects("ord*").await.unwrap(), ["orders"]);

    source.shutdown().await.unwrap();
    database.drop_database().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn relational_table_syncs_into_the_destination() {
    if skip_if_missing_mysql_env_vars() {
        return;
    }

    init_test_tracing();

    let database = setup_mysql_database().await;
    database
        .execute("CREATE TABLE orders (order_id INT NOT NULL PRIMARY KEY, status VARCHAR(16))")
        .await;
    database
        .execute("INSERT INTO orders VALUES (1, 'new'), (2, 'paid'), (3, 'new')")
        .await;

    let destination = MemoryDestination::new();
    let config = PipelineConfig {
        extraction: ExtractionConfig {
            page_size: 2,
            retry_pause_ms: 0,
            ..ExtractionConfig::default()
        },
        ..PipelineConfig::default()
    };
    let pipeline = Pipeline::new(config, database.connector(), destination.clone());

    let summary = pipeline.run(vec![orders()]).await.unwrap();

    assert_eq!(summary.outcomes[0].status, ObjectStatus::Succeeded);
    assert_eq!(destination.table_rows("orders").await.len(), 3);

    database.drop_database().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_table_fails_the_page_query() {
    if skip_if_missing_mysql_env_vars() {
        return;
    }

    init_test_tracing();

    let database = setup_mysql_database().await;
    let source = database.connector().connect().await.unwrap();

    let err = source
        .fetch_page(&orders(), &Predicate::All, 10, 0)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SourceQueryFailed);

    source.shutdown().await.unwrap();
    database.drop_database().await;
}
