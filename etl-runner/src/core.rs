use std::collections::BTreeMap;

use etl::connector::{DestinationConnector, SourceConnector};
use etl::error::EtlResult;
use etl::pipeline::{ObjectOutcome, Pipeline, RunSummary};
use etl::types::SourceObject;
use etl_config::shared::{
    DestinationConfig, ObjectConfig, PipelineConfig, SourceConfig, SyncConfig,
};
use etl_connectors::clickhouse::ClickHouseConnector;
use etl_connectors::mysql::MySqlConnector;
use etl_connectors::opensearch::OpenSearchConnector;
use tracing::{error, info, warn};

use crate::error::RunnerResult;

/// Runs every configured object and returns the merged summary.
///
/// Objects are grouped by source and each group runs through its own pipeline, in the order of
/// the source keys. Only sources selected by `only_sources` run. The run stops early only when
/// the destination cannot be reached before the first source starts. A later source whose
/// pipeline fails as a whole fails its objects and the run moves on.
pub async fn run_with_config(config: SyncConfig) -> RunnerResult<RunSummary> {
    let destination_connector = match &config.destination {
        DestinationConfig::ClickHouse(clickhouse) => ClickHouseConnector::new(clickhouse.clone()),
    };

    let mut summary = RunSummary::default();
    let mut first = true;
    for (source_key, objects) in objects_by_source(&config) {
        let Some(source_config) = config.sources.get(source_key) else {
            // Unknown sources are rejected by validation.
            warn!(source = source_key, "skipping objects of an unknown source");
            continue;
        };

        info!(
            source = source_key,
            engine = source_config.engine(),
            objects = objects.len(),
            "syncing source"
        );

        let pending = objects.clone();
        let result = match source_config {
            SourceConfig::ClickHouse(clickhouse) => {
                run_source(
                    &config.pipeline,
                    ClickHouseConnector::new(clickhouse.clone()),
                    destination_connector.clone(),
                    objects,
                )
                .await
            }
            SourceConfig::MySql(mysql) => {
                run_source(
                    &config.pipeline,
                    MySqlConnector::new(mysql.clone()),
                    destination_connector.clone(),
                    objects,
                )
                .await
            }
            SourceConfig::OpenSearch(opensearch) => {
                run_source(
                    &config.pipeline,
                    OpenSearchConnector::new(opensearch.clone()),
                    destination_connector.clone(),
                    objects,
                )
                .await
            }
        };

        record_source_result(&mut summary, source_key, &pending, result, first)?;
        first = false;
    }

    Ok(summary)
}

async fn run_source<SC, DC>(
    config: &PipelineConfig,
    source_connector: SC,
    destination_connector: DC,
    objects: Vec<SourceObject>,
) -> EtlResult<RunSummary>
where
    SC: SourceConnector + Sync,
    DC: DestinationConnector + Sync,
{
    let pipeline = Pipeline::new(config.clone(), source_connector, destination_connector);
    pipeline.run(objects).await
}

/// Merges the result of one source's pipeline into `summary`.
///
/// An error of the first source aborts the run. Errors of later sources become failed outcomes
/// for every object of that source.
fn record_source_result(
    summary: &mut RunSummary,
    source_key: &str,
    objects: &[SourceObject],
    result: EtlResult<RunSummary>,
    first: bool,
) -> RunnerResult<()> {
    match result {
        Ok(source_summary) => summary.merge(source_summary),
        Err(err) if first => return Err(err.into()),
        Err(err) => {
            error!(
                source = source_key,
                objects = objects.len(),
                error = %err,
                "source failed, marking its objects as failed"
            );
            summary.outcomes.extend(
                objects
                    .iter()
                    .map(|object| ObjectOutcome::failed(object, err.clone())),
            );
        }
    }

    Ok(())
}

/// Groups the selected objects by source key, keeping their configured order within a source.
fn objects_by_source(config: &SyncConfig) -> BTreeMap<&str, Vec<SourceObject>> {
    let mut groups: BTreeMap<&str, Vec<SourceObject>> = BTreeMap::new();
    for object in config
        .objects
        .iter()
        .filter(|object| config.runs_source(&object.source))
    {
        groups
            .entry(object.source.as_str())
            .or_default()
            .push(source_object(object));
    }

    groups
}

/// Builds the [`SourceObject`] described by a configured object.
///
/// The provenance label defaults to the source key.
pub fn source_object(config: &ObjectConfig) -> SourceObject {
    let source_system = config.source_system.as_deref().unwrap_or(&config.source);
    let mut object = SourceObject::new(config.name.clone(), config.kind, source_system)
        .with_destination(config.destination_table())
        .with_key_columns(config.key_columns.iter().cloned())
        .with_route_keywords(config.route_keywords.iter().cloned());

    if let Some(ordering) = &config.ordering_column {
        object = object.with_ordering(ordering.name.clone(), ordering.typ);
    }
    if let Some(max_rows) = config.max_rows {
        object = object.with_max_rows(max_rows);
    }
    if let Some(page_size) = config.page_size {
        object = object.with_page_size(page_size);
    }

    object
}
