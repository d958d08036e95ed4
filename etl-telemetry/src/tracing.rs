//! Tracing subscriber setup for the sync runner and for tests.

use chrono::{DateTime, Local};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Once;
use thiserror::Error;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::LogTracer;
use tracing_log::log::SetLoggerError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Filter directive used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info";

/// Errors raised while installing the tracing subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to create the log directory `{path}`")]
    LogDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to forward `log` records to tracing")]
    LogTracer(#[from] SetLoggerError),

    #[error("a global tracing subscriber is already installed")]
    GlobalDefault(#[from] SetGlobalDefaultError),
}

/// Flushes buffered log lines to the log file when dropped.
///
/// Keep it alive until the process exits, otherwise the last lines of the run are lost.
#[must_use = "dropping the flusher stops writing to the log file"]
#[derive(Debug)]
pub struct LogFlusher {
    log_file: PathBuf,
    _guard: WorkerGuard,
}

impl LogFlusher {
    /// Returns the file this run logs to.
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }
}

/// Installs the global subscriber of a service.
///
/// Events go both to the console and to a dedicated file per run inside `log_dir`, named after
/// the service and the start time. The level is controlled by `RUST_LOG` and defaults to `info`.
/// Records emitted through the `log` crate by dependencies are forwarded as well.
pub fn init_tracing(service_name: &str, log_dir: &Path) -> Result<LogFlusher, TracingError> {
    std::fs::create_dir_all(log_dir).map_err(|source| TracingError::LogDirectory {
        path: log_dir.to_path_buf(),
        source,
    })?;

    let file_name = log_file_name(service_name, Local::now());
    let log_file = log_dir.join(&file_name);
    let file_appender = tracing_appender::rolling::never(log_dir, &file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    LogTracer::init()?;

    let subscriber = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer));

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(LogFlusher {
        log_file,
        _guard: guard,
    })
}

/// Installs a subscriber writing to the test harness output.
///
/// Safe to call from every test; only the first call has an effect.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = fmt()
            .with_env_filter(env_filter())
            .with_test_writer()
            .try_init();
    });
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn log_file_name(service_name: &str, started_at: DateTime<Local>) -> String {
    format!("{service_name}_{}.log", started_at.format("%Y%m%d_%H%M%S"))
}
