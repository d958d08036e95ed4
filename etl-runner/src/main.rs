//! Sync runner binary.
//!
//! Loads the sync configuration, initializes tracing and runs every configured object once,
//! from its source into the ClickHouse warehouse. Exits with a failure status when the
//! destination is unreachable or any object fails.

use std::path::Path;

use anyhow::Context;
use etl::pipeline::ObjectStatus;
use etl_config::shared::SyncConfig;
use etl_telemetry::tracing::init_tracing;
use tracing::{error, info};

use crate::config::load_sync_config;
use crate::core::run_with_config;
use crate::error::{RunnerError, RunnerResult};

mod config;
mod core;
mod error;

/// Directory the per-run log files are written to.
const LOG_DIR: &str = "logs";

fn main() -> anyhow::Result<()> {
    let config = load_sync_config().context("failed to load the sync configuration")?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"), Path::new(LOG_DIR))
        .context("failed to initialize tracing")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(RunnerError::from)?;

    if let Err(err) = runtime.block_on(async_main(config)) {
        error!(category = err.category(), "{err}");
        eprint!("{}", err.render_report());
        return Err(err.into());
    }

    Ok(())
}

async fn async_main(config: SyncConfig) -> RunnerResult<()> {
    info!(
        sources = config.sources.len(),
        objects = config.objects.len(),
        max_concurrent_objects = config.pipeline.max_concurrent_objects,
        "starting sync run"
    );

    let summary = run_with_config(config).await?;
    info!(%summary, rows_loaded = summary.rows_loaded(), "sync run finished");

    if summary.has_failures() {
        return Err(RunnerError::ObjectsFailed {
            failed: summary.count(ObjectStatus::Failed),
        });
    }

    Ok(())
}
