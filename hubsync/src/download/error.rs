//! Error types for the download coordinator.

use thiserror::Error;

/// Errors returned synchronously by the coordinator API.
///
/// Transport and protocol failures never show up here: they are absorbed by
/// the coordinator and surface, when terminal, as an `Errored` record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    /// The request failed validation before reaching the coordinator loop.
    #[error("invalid download request: {0}")]
    InvalidRequest(String),

    /// The coordinator loop has stopped and no longer accepts commands.
    #[error("download coordinator is shut down")]
    CoordinatorClosed,
}
