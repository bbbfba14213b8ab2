//! Logging setup.
//!
//! Logs go to a daily-rolling file in the configured directory through a
//! non-blocking writer. The filter comes from `RUST_LOG` when set, otherwise
//! from the configured level.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::EnvFilter;

use crate::config::{LoggingSettings, DEFAULT_LOG_LEVEL};

/// Prefix of the log file names (`hubsync.log.YYYY-MM-DD`).
pub const LOG_FILE_PREFIX: &str = "hubsync.log";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to install log subscriber: {0}")]
    Init(String),
}

/// Keeps the background log writer alive.
///
/// Buffered lines are flushed when this is dropped, so hold it until the
/// program exits.
pub struct LoggingGuard {
    _guard: WorkerGuard,
    directory: PathBuf,
}

impl LoggingGuard {
    /// Directory the log files are written to.
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

/// Install the global tracing subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(settings: &LoggingSettings) -> Result<LoggingGuard, LoggingError> {
    std::fs::create_dir_all(&settings.directory).map_err(|source| LoggingError::CreateDirectory {
        path: settings.directory.clone(),
        source,
    })?;

    let appender = tracing_appender::rolling::daily(&settings.directory, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(build_filter(&settings.level))
        .with_writer(writer)
        .with_ansi(false)
        .with_timer(LocalTime::rfc_3339())
        .with_target(true)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    Ok(LoggingGuard {
        _guard: guard,
        directory: settings.directory.clone(),
    })
}

/// `RUST_LOG` if set and valid, else `level`, else the default level.
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))
}
