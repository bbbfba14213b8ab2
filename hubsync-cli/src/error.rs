//! CLI error type.

use std::fmt;

use hubsync::config::ConfigError;
use hubsync::download::DownloadError;
use hubsync::logging::LoggingError;

/// Errors reported to the user before exiting with a non-zero status.
#[derive(Debug)]
pub enum CliError {
    /// Configuration file or argument problem.
    Config(String),
    /// Logging could not be set up.
    Logging(String),
    /// A download request was rejected.
    Download(DownloadError),
    /// The async runtime could not be started.
    Runtime(String),
    /// Some downloads did not complete.
    DownloadsFailed { failed: usize, total: usize },
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Logging(msg) => write!(f, "Logging error: {}", msg),
            CliError::Download(e) => write!(f, "Download error: {}", e),
            CliError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
            CliError::DownloadsFailed { failed, total } => {
                write!(f, "{} of {} downloads did not complete", failed, total)
            }
        }
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<DownloadError> for CliError {
    fn from(e: DownloadError) -> Self {
        CliError::Download(e)
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e.to_string())
    }
}
