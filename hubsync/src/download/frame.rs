//! Inbound progress frames.
//!
//! One frame is one JSON text message received on a download's channel:
//!
//! ```text
//! {"status":"progress","downloadedBytes":50,"totalBytes":100,
//!  "downloadedFiles":1,"totalFiles":2,"currentFile":"model.safetensors"}
//! ```
//!
//! The `status` field is parsed into the closed [`FrameStatus`] enum here, so
//! an unknown status is a parse failure at the channel boundary rather than a
//! string travelling further in.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status carried by a progress frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameStatus {
    /// The server accepted the request and is preparing the transfer.
    Start,
    /// Counters moved.
    Progress,
    /// All files are on disk.
    Completed,
    /// The server stopped the transfer at the client's request.
    Cancelled,
    /// The server gave up.
    Error,
}

impl FrameStatus {
    /// Whether this status ends the download.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FrameStatus::Completed | FrameStatus::Cancelled | FrameStatus::Error
        )
    }
}

/// A typed progress event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressFrame {
    pub status: FrameStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_files: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_files: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
}

impl ProgressFrame {
    /// Create a frame carrying only a status.
    pub fn new(status: FrameStatus) -> Self {
        Self {
            status,
            message: None,
            downloaded_bytes: None,
            total_bytes: None,
            downloaded_files: None,
            total_files: None,
            current_file: None,
        }
    }

    /// Parse a frame from the wire.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))
    }

    /// Encode the frame for the wire.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_bytes(mut self, downloaded: u64, total: Option<u64>) -> Self {
        self.downloaded_bytes = Some(downloaded);
        self.total_bytes = total;
        self
    }

    pub fn with_files(mut self, downloaded: u64, total: Option<u64>) -> Self {
        self.downloaded_files = Some(downloaded);
        self.total_files = total;
        self
    }

    pub fn with_current_file(mut self, file: impl Into<String>) -> Self {
        self.current_file = Some(file.into());
        self
    }
}

/// Reasons a frame is rejected without touching the download record.
///
/// None of these reach the UI; they are logged and the frame is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The text was not a valid frame (bad JSON, unknown status, negative
    /// counter, ...).
    #[error("malformed progress frame: {0}")]
    Malformed(String),

    /// A downloaded counter went backwards, most likely a reordered frame.
    #[error("out-of-order frame: {counter} went from {previous} to {received}")]
    OutOfOrder {
        counter: &'static str,
        previous: u64,
        received: u64,
    },

    /// A downloaded counter exceeds its known total.
    #[error("inconsistent frame: {counter} {downloaded} exceeds total {total}")]
    ExceedsTotal {
        counter: &'static str,
        downloaded: u64,
        total: u64,
    },
}
