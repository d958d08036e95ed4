//! Orchestration of incremental syncs, one source object at a time.

use etl_config::shared::PipelineConfig;
use futures::{StreamExt, stream};
use metrics::{counter, histogram};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::connector::{DestinationConnector, SourceConnector};
use crate::destination::Destination;
use crate::error::{EtlError, EtlResult};
use crate::extract::{ExtractionOptions, ExtractionReport, ExtractionStatus, Extractor};
use crate::filter::{Predicate, build_filter};
use crate::load::{finalize_table, load_batch};
use crate::metrics::{
    DESTINATION_TABLE_LABEL, ETL_OBJECT_DURATION_SECONDS, ETL_OBJECTS_PROCESSED_TOTAL,
    OBJECT_LABEL, STATUS_LABEL,
};
use crate::routing::{expand_pattern, needs_expansion};
use crate::schema::{TableTarget, copy_source_table, ensure_schema};
use crate::source::Source;
use crate::transform::RowTransformer;
use crate::types::{SourceObject, Watermark};
use crate::watermark::resolve_watermark;

/// Final status of one processed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectStatus {
    /// Every new record was loaded.
    Succeeded,
    /// Loading stopped at the row cap; the next run continues from the new watermark.
    Capped,
    /// Some pages or write batches were lost, or compaction failed.
    Partial,
    /// No filter could be built from the watermark.
    Skipped,
    Failed,
}

impl ObjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectStatus::Succeeded => "succeeded",
            ObjectStatus::Capped => "capped",
            ObjectStatus::Partial => "partial",
            ObjectStatus::Skipped => "skipped",
            ObjectStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ObjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of processing one object.
#[derive(Debug, Clone)]
pub struct ObjectOutcome {
    pub object: String,
    pub destination: String,
    pub status: ObjectStatus,
    pub rows_extracted: u64,
    pub rows_loaded: u64,
    /// Row count of the destination table after loading and compaction.
    pub final_row_count: Option<u64>,
    /// The error that failed or skipped the object.
    pub error: Option<EtlError>,
}

impl ObjectOutcome {
    fn new(object: &SourceObject, status: ObjectStatus) -> Self {
        Self {
            object: object.name.clone(),
            destination: object.destination.clone(),
            status,
            rows_extracted: 0,
            rows_loaded: 0,
            final_row_count: None,
            error: None,
        }
    }

    fn with_error(mut self, error: EtlError) -> Self {
        self.error = Some(error);
        self
    }

    /// Outcome of an object that never ran because its whole pipeline failed.
    pub fn failed(object: &SourceObject, error: EtlError) -> Self {
        Self::new(object, ObjectStatus::Failed).with_error(error)
    }
}

/// Outcomes of a run over many objects, in processing order.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub outcomes: Vec<ObjectOutcome>,
}

impl RunSummary {
    /// Returns how many objects ended with `status`.
    pub fn count(&self, status: ObjectStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == status)
            .count()
    }

    /// Returns `true` when any object failed, which makes the run fail.
    pub fn has_failures(&self) -> bool {
        self.count(ObjectStatus::Failed) > 0
    }

    pub fn rows_loaded(&self) -> u64 {
        self.outcomes.iter().map(|outcome| outcome.rows_loaded).sum()
    }

    pub fn merge(&mut self, other: RunSummary) {
        self.outcomes.extend(other.outcomes);
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} objects: {} succeeded, {} capped, {} partial, {} skipped, {} failed",
            self.outcomes.len(),
            self.count(ObjectStatus::Succeeded),
            self.count(ObjectStatus::Capped),
            self.count(ObjectStatus::Partial),
            self.count(ObjectStatus::Skipped),
            self.count(ObjectStatus::Failed),
        )
    }
}

#[derive(Debug, Default)]
struct Progress {
    rows_extracted: u64,
    rows_loaded: u64,
    failed_loads: u64,
}

/// Runs incremental syncs from one source into one destination.
///
/// Each object goes through watermark resolution, filter building, paged extraction,
/// transformation, schema reconciliation and loading, strictly batch by batch. Errors never
/// escape an object: they are logged and turned into its [`ObjectOutcome`].
#[derive(Debug)]
pub struct Pipeline<SC, DC> {
    config: Arc<PipelineConfig>,
    source_connector: SC,
    destination_connector: DC,
}

impl<SC, DC> Pipeline<SC, DC>
where
    SC: SourceConnector + Sync,
    DC: DestinationConnector + Sync,
{
    pub fn new(config: PipelineConfig, source_connector: SC, destination_connector: DC) -> Self {
        Self {
            config: Arc::new(config),
            source_connector,
            destination_connector,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Verifies that the destination is reachable.
    pub async fn check_destination(&self) -> EtlResult<()> {
        let destination = self.destination_connector.connect().await?;
        destination.shutdown().await
    }

    /// Processes `objects` and returns their outcomes.
    ///
    /// Wildcard search-index objects are first expanded into one object per matching index.
    /// Objects writing the same destination table are processed one after the other, and up to
    /// `max_concurrent_objects` destination tables are synced at the same time.
    ///
    /// Fails only when the destination cannot be reached before the first object starts.
    pub async fn run(&self, objects: Vec<SourceObject>) -> EtlResult<RunSummary> {
        if let Err(err) = self.check_destination().await {
            error!(error = %err, "destination is unreachable, aborting run");
            return Err(err);
        }

        let mut summary = RunSummary::default();
        let objects = self.expand_patterns(objects, &mut summary).await;
        let groups = group_by_destination(objects);

        info!(
            objects = groups.iter().map(Vec::len).sum::<usize>(),
            destinations = groups.len(),
            max_concurrent_objects = self.config.max_concurrent_objects,
            "starting run"
        );

        let outcomes: Vec<Vec<ObjectOutcome>> = stream::iter(groups)
            .map(|group| async move {
                let mut outcomes = Vec::with_capacity(group.len());
                for object in &group {
                    outcomes.push(self.process_object(object).await);
                }
                outcomes
            })
            .buffered(self.config.max_concurrent_objects.max(1))
            .collect()
            .await;

        summary.outcomes.extend(outcomes.into_iter().flatten());

        info!(%summary, rows_loaded = summary.rows_loaded(), "run finished");

        Ok(summary)
    }

    /// Syncs one object and reports how it went.
    ///
    /// Connections are opened here and shut down before returning.
    pub async fn process_object(&self, object: &SourceObject) -> ObjectOutcome {
        let started = Instant::now();
        info!(object = %object.name, destination = %object.destination, "processing object");

        let outcome = match self.connect().await {
            Ok((source, destination)) => {
                let outcome = self.sync_object(&source, &destination, object).await;
                release(&source, &destination, object).await;
                outcome
            }
            Err(err) => {
                error!(object = %object.name, error = %err, "failed to connect");
                ObjectOutcome::new(object, ObjectStatus::Failed).with_error(err)
            }
        };

        let elapsed = started.elapsed().as_secs_f64();
        counter!(
            ETL_OBJECTS_PROCESSED_TOTAL,
            STATUS_LABEL => outcome.status.as_str(),
            DESTINATION_TABLE_LABEL => object.destination.clone()
        )
        .increment(1);
        histogram!(ETL_OBJECT_DURATION_SECONDS, OBJECT_LABEL => object.name.clone())
            .record(elapsed);

        match &outcome.error {
            Some(err) => warn!(
                object = %object.name,
                status = %outcome.status,
                rows_loaded = outcome.rows_loaded,
                error = %err,
                elapsed_secs = elapsed,
                "object finished with an error"
            ),
            None => info!(
                object = %object.name,
                status = %outcome.status,
                rows_extracted = outcome.rows_extracted,
                rows_loaded = outcome.rows_loaded,
                final_row_count = outcome.final_row_count,
                elapsed_secs = elapsed,
                "object finished"
            ),
        }

        outcome
    }

    async fn connect(&self) -> EtlResult<(SC::Source, DC::Destination)> {
        let destination = self.destination_connector.connect().await?;
        match self.source_connector.connect().await {
            Ok(source) => Ok((source, destination)),
            Err(err) => {
                if let Err(shutdown_err) = destination.shutdown().await {
                    warn!(error = %shutdown_err, "failed to shut down destination connection");
                }
                Err(err)
            }
        }
    }

    async fn sync_object(
        &self,
        source: &SC::Source,
        destination: &DC::Destination,
        object: &SourceObject,
    ) -> ObjectOutcome {
        let mut transformer = RowTransformer::for_object(object);
        let ordering_column = object
            .ordering
            .as_ref()
            .map(|ordering| transformer.column_name(&ordering.name));

        if let Err(err) = copy_source_table(source, destination, object).await {
            warn!(
                object = %object.name,
                error = %err,
                "failed to copy the source table definition, inferring it from the data"
            );
        }

        // We derive the watermark from the destination itself, so there is no state to keep
        // in sync with it.
        let watermark = match (&object.ordering, &ordering_column) {
            (Some(ordering), Some(column)) => {
                resolve_watermark(destination, &object.destination, column, ordering.typ).await
            }
            _ => Watermark::Absent,
        };

        let predicate = match &object.ordering {
            Some(ordering) => match build_filter(ordering, &watermark) {
                Ok(predicate) => predicate,
                Err(err) => {
                    warn!(
                        object = %object.name,
                        %watermark,
                        error = %err,
                        "skipping object, no filter for its watermark"
                    );
                    return ObjectOutcome::new(object, ObjectStatus::Skipped).with_error(err);
                }
            },
            None => Predicate::All,
        };

        info!(object = %object.name, %watermark, predicate = ?predicate, "extracting new records");

        let options = ExtractionOptions::for_object(&self.config.extraction, object);
        let mut extractor = match Extractor::start(source, object, &predicate, options).await {
            Ok(extractor) => extractor,
            Err(err) => return ObjectOutcome::new(object, ObjectStatus::Failed).with_error(err),
        };

        let mut target = TableTarget::new(object.destination.clone()).with_key_columns(
            object
                .key_columns
                .iter()
                .map(|key| transformer.column_name(key))
                .collect(),
        );
        target.ordering_column = ordering_column;

        let mut progress = Progress::default();
        let result = self
            .drain(&mut extractor, destination, &mut transformer, &target, &mut progress)
            .await;

        // The extractor must be finished on every path to release scroll cursors.
        let report = extractor.finish().await;

        let mut outcome = ObjectOutcome::new(object, ObjectStatus::Succeeded);
        outcome.rows_extracted = progress.rows_extracted;
        outcome.rows_loaded = progress.rows_loaded;

        if let Err(err) = result {
            outcome.status = ObjectStatus::Failed;
            return outcome.with_error(err);
        }

        let mut compaction_failed = false;
        if progress.rows_loaded > 0 {
            match finalize_table(destination, &object.destination, object.is_deduplicating()).await
            {
                Ok(row_count) => outcome.final_row_count = Some(row_count),
                Err(err) => {
                    warn!(
                        object = %object.name,
                        error = %err,
                        "failed to finalize destination table"
                    );
                    compaction_failed = true;
                }
            }
        }

        outcome.status = object_status(&report, progress.failed_loads > 0 || compaction_failed);
        outcome
    }

    async fn drain<S, D>(
        &self,
        extractor: &mut Extractor<'_, S>,
        destination: &D,
        transformer: &mut RowTransformer,
        target: &TableTarget,
        progress: &mut Progress,
    ) -> EtlResult<()>
    where
        S: Source + Sync,
        D: Destination + Sync,
    {
        while let Some(batch) = extractor.next_batch().await? {
            progress.rows_extracted += batch.len() as u64;

            let mut batch = transformer.transform(batch);
            if batch.is_empty() || batch.columns().is_empty() {
                continue;
            }

            ensure_schema(destination, target, &mut batch).await?;

            match load_batch(
                destination,
                &target.table,
                batch,
                self.config.extraction.write_batch_size,
            )
            .await
            {
                Ok(rows) => progress.rows_loaded += rows,
                Err(err) => {
                    // The batch is lost; the watermark only covers what was loaded.
                    error!(table = %target.table, error = %err, "failed to load batch, moving on");
                    progress.failed_loads += 1;
                }
            }
        }

        Ok(())
    }

    async fn expand_patterns(
        &self,
        objects: Vec<SourceObject>,
        summary: &mut RunSummary,
    ) -> Vec<SourceObject> {
        if !objects.iter().any(needs_expansion) {
            return objects;
        }

        let source = match self.source_connector.connect().await {
            Ok(source) => source,
            Err(err) => {
                error!(error = %err, "failed to connect to expand index patterns");
                let (patterns, concrete): (Vec<_>, Vec<_>) =
                    objects.into_iter().partition(needs_expansion);
                for pattern in patterns {
                    summary.outcomes.push(
                        ObjectOutcome::new(&pattern, ObjectStatus::Failed).with_error(err.clone()),
                    );
                }
                return concrete;
            }
        };

        let mut expanded = Vec::with_capacity(objects.len());
        for object in objects {
            if !needs_expansion(&object) {
                expanded.push(object);
                continue;
            }

            match source.list_objects(&object.name).await {
                Ok(indices) => {
                    info!(
                        pattern = %object.name,
                        indices = indices.len(),
                        "expanded index pattern"
                    );
                    expanded.extend(expand_pattern(&object, &indices));
                }
                Err(err) => {
                    error!(pattern = %object.name, error = %err, "failed to list indices");
                    summary
                        .outcomes
                        .push(ObjectOutcome::new(&object, ObjectStatus::Failed).with_error(err));
                }
            }
        }

        if let Err(err) = source.shutdown().await {
            warn!(error = %err, "failed to shut down source connection");
        }

        expanded
    }
}

fn object_status(report: &ExtractionReport, lost_data: bool) -> ObjectStatus {
    if lost_data {
        return ObjectStatus::Partial;
    }

    match report.status {
        ExtractionStatus::Complete => ObjectStatus::Succeeded,
        ExtractionStatus::Capped => ObjectStatus::Capped,
        ExtractionStatus::Partial => ObjectStatus::Partial,
    }
}

/// Groups objects by destination table, keeping the first-seen order of tables and objects.
fn group_by_destination(objects: Vec<SourceObject>) -> Vec<Vec<SourceObject>> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<SourceObject>> = Vec::new();

    for object in objects {
        match positions.get(&object.destination) {
            Some(position) => groups[*position].push(object),
            None => {
                positions.insert(object.destination.clone(), groups.len());
                groups.push(vec![object]);
            }
        }
    }

    groups
}

async fn release<S, D>(source: &S, destination: &D, object: &SourceObject)
where
    S: Source + Sync,
    D: Destination + Sync,
{
    if let Err(err) = source.shutdown().await {
        warn!(object = %object.name, error = %err, "failed to shut down source connection");
    }
    if let Err(err) = destination.shutdown().await {
        warn!(object = %object.name, error = %err, "failed to shut down destination connection");
    }
}
