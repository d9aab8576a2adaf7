use crate::infrastructure::error::InfraError;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_PREFIX: &str = "commands.log";
const MAX_LOG_FILES: usize = 7;
const DEFAULT_FILTER: &str = "info";

/// Installs the global subscriber writing JSON lines to a daily-rotated file
/// under `logs_dir`. Keep the returned guard alive for as long as logs should
/// be flushed.
pub fn init_logging(logs_dir: &Path) -> Result<WorkerGuard, InfraError> {
    let appender = tracing_appender::rolling::Builder::new()
        .rotation(Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .filename_prefix(LOG_FILE_PREFIX)
        .build(logs_dir)
        .map_err(|error| InfraError::InvalidConfig(format!("cannot open log directory: {error}")))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .json()
        .try_init()
        .map_err(|error| InfraError::InvalidConfig(format!("logging already initialized: {error}")))?;

    Ok(guard)
}
