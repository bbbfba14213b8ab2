//! Presentation projection.
//!
//! Maps a [`DownloadRecord`] to what a progress display should show. Pure
//! functions only; the CLI and any other front end render the result.
//!
//! ```text
//! org/model        ████████░░░░░░░░  50%  1.50 GB / 3.00 GB
//! org/other        ░░░░░░░░░░░░░░░░       Starting download...
//! org/done         ████████████████ 100%  Download complete
//! ```

use super::record::{DownloadRecord, DownloadStatus};

/// Characters for progress bar rendering.
pub const PROGRESS_FULL: char = '█';
pub const PROGRESS_EMPTY: char = '░';

/// Default width of the progress bar in characters.
pub const PROGRESS_BAR_WIDTH: usize = 16;

const STARTING_MESSAGE: &str = "Starting download...";
const COMPLETED_MESSAGE: &str = "Download complete";
const CANCELLED_MESSAGE: &str = "Download cancelled";
const FAILED_MESSAGE: &str = "Download failed";

/// What to display for one download.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressView {
    /// Queued or starting: indeterminate indicator with a message.
    Pending { message: String },
    /// Transferring. `percent` is `None` while totals are unknown.
    Running {
        percent: Option<u8>,
        detail: String,
        current_file: Option<String>,
    },
    Finished { message: String },
    Cancelled { message: String },
    Failed { message: String },
}

impl ProgressView {
    /// Whether the view is in a final state.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            ProgressView::Finished { .. } | ProgressView::Cancelled { .. } | ProgressView::Failed { .. }
        )
    }

    /// The single line of text to show next to the bar.
    pub fn message(&self) -> &str {
        match self {
            ProgressView::Pending { message }
            | ProgressView::Finished { message }
            | ProgressView::Cancelled { message }
            | ProgressView::Failed { message } => message,
            ProgressView::Running { detail, .. } => detail,
        }
    }
}

/// Project a record onto its view.
pub fn project(record: &DownloadRecord) -> ProgressView {
    match record.status {
        DownloadStatus::Queued | DownloadStatus::Starting => ProgressView::Pending {
            message: record
                .message
                .clone()
                .unwrap_or_else(|| STARTING_MESSAGE.to_string()),
        },
        DownloadStatus::InProgress => ProgressView::Running {
            percent: record.progress_percent(),
            detail: running_detail(record),
            current_file: record.current_file.clone(),
        },
        // The last message is usually stale progress text by now.
        DownloadStatus::Completed => ProgressView::Finished {
            message: COMPLETED_MESSAGE.to_string(),
        },
        DownloadStatus::Cancelled => ProgressView::Cancelled {
            message: record
                .message
                .clone()
                .unwrap_or_else(|| CANCELLED_MESSAGE.to_string()),
        },
        DownloadStatus::Errored => ProgressView::Failed {
            message: record
                .message
                .clone()
                .unwrap_or_else(|| FAILED_MESSAGE.to_string()),
        },
    }
}

fn running_detail(record: &DownloadRecord) -> String {
    let mut parts = Vec::new();

    match record.total_bytes {
        Some(total) => parts.push(format!(
            "{} / {}",
            format_bytes(record.downloaded_bytes),
            format_bytes(total)
        )),
        None if record.downloaded_bytes > 0 => parts.push(format_bytes(record.downloaded_bytes)),
        None => {}
    }

    if let Some(total) = record.total_files {
        if total > 1 {
            parts.push(format!("{}/{} files", record.downloaded_files, total));
        }
    }

    if parts.is_empty() {
        record
            .message
            .clone()
            .unwrap_or_else(|| "Downloading...".to_string())
    } else {
        parts.join(", ")
    }
}

/// Render a progress bar string.
pub fn render_bar(percent: u8, width: usize) -> String {
    let filled = ((percent.min(100) as usize * width) / 100).min(width);
    let empty = width - filled;

    format!(
        "{}{}",
        PROGRESS_FULL.to_string().repeat(filled),
        PROGRESS_EMPTY.to_string().repeat(empty)
    )
}

/// Format a size in bytes as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::key::{DownloadKey, SourceParams};

    fn record(status: DownloadStatus) -> DownloadRecord {
        let source = SourceParams::new("org/model", "checkpoints");
        DownloadRecord::queued(DownloadKey::for_source(&source), source, 1, None)
            .with_status(status, None)
    }

    #[test]
    fn test_render_bar_empty() {
        let bar = render_bar(0, PROGRESS_BAR_WIDTH);
        assert_eq!(bar.chars().filter(|&c| c == PROGRESS_EMPTY).count(), 16);
        assert_eq!(bar.chars().filter(|&c| c == PROGRESS_FULL).count(), 0);
    }

    #[test]
    fn test_render_bar_half() {
        let bar = render_bar(50, PROGRESS_BAR_WIDTH);
        assert_eq!(bar.chars().filter(|&c| c == PROGRESS_FULL).count(), 8);
        assert_eq!(bar.chars().filter(|&c| c == PROGRESS_EMPTY).count(), 8);
    }

    #[test]
    fn test_render_bar_clamps() {
        let bar = render_bar(250, 10);
        assert_eq!(bar.chars().count(), 10);
        assert!(bar.chars().all(|c| c == PROGRESS_FULL));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn test_pending_views() {
        assert_eq!(
            project(&record(DownloadStatus::Queued)),
            ProgressView::Pending {
                message: STARTING_MESSAGE.to_string()
            }
        );

        let mut starting = record(DownloadStatus::Starting);
        starting.message = Some("resolving files".to_string());
        assert_eq!(project(&starting).message(), "resolving files");
    }

    #[test]
    fn test_running_with_totals() {
        let mut running = record(DownloadStatus::InProgress);
        running.downloaded_bytes = 512 * 1024;
        running.total_bytes = Some(1024 * 1024);
        running.downloaded_files = 1;
        running.total_files = Some(3);
        running.current_file = Some("vae.safetensors".to_string());

        match project(&running) {
            ProgressView::Running {
                percent,
                detail,
                current_file,
            } => {
                assert_eq!(percent, Some(50));
                assert_eq!(detail, "512.00 KB / 1.00 MB, 1/3 files");
                assert_eq!(current_file.as_deref(), Some("vae.safetensors"));
            }
            other => panic!("unexpected view: {:?}", other),
        }
    }

    #[test]
    fn test_running_without_totals_is_indeterminate() {
        let mut running = record(DownloadStatus::InProgress);
        running.downloaded_bytes = 2048;

        let view = project(&running);
        assert!(matches!(view, ProgressView::Running { percent: None, .. }));
        assert_eq!(view.message(), "2.00 KB");
    }

    #[test]
    fn test_final_views() {
        assert_eq!(
            project(&record(DownloadStatus::Completed)).message(),
            COMPLETED_MESSAGE
        );
        assert!(matches!(
            project(&record(DownloadStatus::Cancelled)),
            ProgressView::Cancelled { .. }
        ));

        let failed = record(DownloadStatus::Queued).errored("401 Unauthorized");
        let view = project(&failed);
        assert_eq!(
            view,
            ProgressView::Failed {
                message: "401 Unauthorized".to_string()
            }
        );
        assert!(view.is_final());
    }
}
