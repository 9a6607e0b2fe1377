// Tracing subscriber setup

use crate::config::{config_dir, LoggingSettings};
use crate::error::{PermissionError, Result};
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, Layer};

pub fn parse_level(level: &str) -> Result<LevelFilter> {
    level
        .parse::<LevelFilter>()
        .map_err(|_| PermissionError::ConfigError(format!("Unknown log level '{}'", level)))
}

/// Directory the log file is written to: `logging.dir`, or `~/.permstore/logs`.
pub fn log_dir(settings: &LoggingSettings) -> Result<PathBuf> {
    match settings.dir {
        Some(ref dir) => Ok(dir.clone()),
        None => Ok(config_dir()?.join("logs")),
    }
}

/// Install the global subscriber: stderr always, plus a plain-text file when
/// `file_name` is configured. Keep the returned guard alive for the whole
/// process or buffered file output is lost.
pub fn init_logging(settings: &LoggingSettings) -> Result<Option<WorkerGuard>> {
    let level = parse_level(&settings.level)?;

    let (file_layer, guard) = match settings.file_name.as_deref().filter(|n| !n.is_empty()) {
        Some(file_name) => {
            let dir = log_dir(settings)?;
            std::fs::create_dir_all(&dir).map_err(|e| {
                PermissionError::ConfigError(format!("Failed to create log directory: {}", e))
            })?;

            let file_appender = tracing_appender::rolling::never(&dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(level);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_filter(level))
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber).map_err(|e| {
        PermissionError::ConfigError(format!("Failed to set tracing subscriber: {}", e))
    })?;

    Ok(guard)
}
