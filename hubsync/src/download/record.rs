//! Download records: the registry's per-key state.

use chrono::{DateTime, Utc};

use super::key::{DownloadKey, SourceParams};

/// Lifecycle status of a download.
///
/// ```text
/// Queued ──► Starting ──► InProgress ──► Completed
///    │           │             │
///    └───────────┴─────────────┴──────► Cancelled | Errored
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownloadStatus {
    /// Accepted; the channel is being opened.
    Queued,
    /// Channel open; the server has not reported any progress yet.
    Starting,
    /// Progress frames are arriving.
    InProgress,
    Completed,
    Cancelled,
    Errored,
}

impl DownloadStatus {
    /// Terminal statuses accept no further frames.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::Cancelled | DownloadStatus::Errored
        )
    }

    /// Active downloads block a second start for the same key.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Statuses in which the registry entry holds an open channel.
    pub fn holds_channel(&self) -> bool {
        matches!(self, DownloadStatus::Starting | DownloadStatus::InProgress)
    }

    /// Short label for display.
    pub fn label(&self) -> &'static str {
        match self {
            DownloadStatus::Queued => "Queued",
            DownloadStatus::Starting => "Starting",
            DownloadStatus::InProgress => "Downloading",
            DownloadStatus::Completed => "Completed",
            DownloadStatus::Cancelled => "Cancelled",
            DownloadStatus::Errored => "Failed",
        }
    }
}

/// State of one download.
///
/// Records are immutable values from the registry's point of view: every
/// change produces a new record that replaces the old one wholesale, so a
/// reader never sees half of an update.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRecord {
    pub key: DownloadKey,
    pub status: DownloadStatus,
    /// Last status text (server message or local failure reason).
    pub message: Option<String>,
    pub downloaded_bytes: u64,
    /// Unknown until the server (or a size hint) reports it.
    pub total_bytes: Option<u64>,
    /// `total_bytes` came from a size hint rather than the server.
    pub total_bytes_is_hint: bool,
    pub downloaded_files: u64,
    pub total_files: Option<u64>,
    /// File currently transferring, for multi-file artifacts.
    pub current_file: Option<String>,
    /// What was requested.
    pub source: SourceParams,
    /// Which `start_download` produced this record. Frames from a channel of
    /// an earlier generation are discarded.
    pub generation: u64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DownloadRecord {
    /// Create the initial record for a freshly accepted download.
    ///
    /// `total_bytes_hint` pre-populates the total before the first frame.
    /// It is display only: the server's figure replaces it as soon as one
    /// arrives, and it is dropped if the transfer grows past it.
    pub fn queued(
        key: DownloadKey,
        source: SourceParams,
        generation: u64,
        total_bytes_hint: Option<u64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            key,
            status: DownloadStatus::Queued,
            message: None,
            downloaded_bytes: 0,
            total_bytes: total_bytes_hint,
            total_bytes_is_hint: total_bytes_hint.is_some(),
            downloaded_files: 0,
            total_files: None,
            current_file: None,
            source,
            generation,
            started_at: now,
            updated_at: now,
        }
    }

    /// Copy of this record with a different status and message.
    pub fn with_status(&self, status: DownloadStatus, message: Option<String>) -> Self {
        let mut next = self.clone();
        next.status = status;
        if message.is_some() {
            next.message = message;
        }
        if status.is_terminal() {
            next.current_file = None;
        }
        next.updated_at = Utc::now();
        next
    }

    /// The channel opened.
    pub fn starting(&self) -> Self {
        self.with_status(DownloadStatus::Starting, None)
    }

    /// Cancelled locally.
    pub fn cancelled(&self) -> Self {
        self.with_status(
            DownloadStatus::Cancelled,
            Some("Download cancelled".to_string()),
        )
    }

    /// Failed with a user-facing reason.
    pub fn errored(&self, reason: impl Into<String>) -> Self {
        self.with_status(DownloadStatus::Errored, Some(reason.into()))
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Progress as a ratio (0.0 to 1.0), if it can be determined.
    ///
    /// Uses bytes when the total size is known, otherwise falls back to file
    /// counts.
    pub fn progress_ratio(&self) -> Option<f64> {
        if self.status == DownloadStatus::Completed {
            return Some(1.0);
        }
        match (self.total_bytes, self.total_files) {
            (Some(total), _) if total > 0 => {
                Some((self.downloaded_bytes as f64 / total as f64).min(1.0))
            }
            (_, Some(total)) if total > 0 => {
                Some((self.downloaded_files as f64 / total as f64).min(1.0))
            }
            _ => None,
        }
    }

    /// Progress as a whole percentage, if it can be determined.
    pub fn progress_percent(&self) -> Option<u8> {
        self.progress_ratio()
            .map(|ratio| (ratio * 100.0).floor().clamp(0.0, 100.0) as u8)
    }
}
