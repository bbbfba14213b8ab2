//! Progress state machine.
//!
//! # Transitions
//!
//! ```text
//! Queued/Starting --[start]--------> Starting   (message only)
//! InProgress      --[start]--------> InProgress (message only)
//! non-terminal    --[progress]-----> InProgress
//! non-terminal    --[completed]----> Completed  [terminal]
//! non-terminal    --[error]--------> Errored    [terminal]
//! non-terminal    --[cancelled]----> Cancelled  [terminal]
//! terminal        --[any]----------> (discarded)
//! ```
//!
//! Downloaded counters only move forward. A frame that would move one back,
//! or past a total reported by the server, is rejected as a whole so a
//! reordered frame can never corrupt displayed progress. A total seeded from
//! a size hint is not binding.

use chrono::Utc;

use super::frame::{FrameError, FrameStatus, ProgressFrame};
use super::record::{DownloadRecord, DownloadStatus};

/// Apply one frame to a record.
///
/// Returns `Ok(None)` when the record is terminal and the frame must be
/// discarded, `Ok(Some(next))` with the replacement record otherwise.
pub fn apply_frame(
    record: &DownloadRecord,
    frame: &ProgressFrame,
) -> Result<Option<DownloadRecord>, FrameError> {
    if record.is_terminal() {
        return Ok(None);
    }

    if frame.status == FrameStatus::Start {
        let mut next = record.clone();
        next.status = next_status(record.status, frame.status);
        if let Some(message) = &frame.message {
            next.message = Some(message.clone());
        }
        next.updated_at = Utc::now();
        return Ok(Some(next));
    }

    let downloaded_bytes = advance(
        "downloadedBytes",
        record.downloaded_bytes,
        frame.downloaded_bytes,
    )?;
    let downloaded_files = advance(
        "downloadedFiles",
        record.downloaded_files,
        frame.downloaded_files,
    )?;

    // A hinted total is only an estimate: it never bounds the counter and is
    // dropped once the transfer outgrows it.
    let (total_bytes, total_bytes_is_hint) = match frame.total_bytes {
        Some(total) => (Some(total), false),
        None if record.total_bytes_is_hint => match record.total_bytes {
            Some(hint) if downloaded_bytes > hint => (None, false),
            hint => (hint, hint.is_some()),
        },
        None => (record.total_bytes, false),
    };
    let total_files = frame.total_files.or(record.total_files);
    if !total_bytes_is_hint {
        within_total("downloadedBytes", downloaded_bytes, total_bytes)?;
    }
    within_total("downloadedFiles", downloaded_files, total_files)?;

    let status = next_status(record.status, frame.status);

    let mut next = record.clone();
    next.status = status;
    next.downloaded_bytes = downloaded_bytes;
    next.downloaded_files = downloaded_files;
    next.total_bytes = total_bytes;
    next.total_bytes_is_hint = total_bytes_is_hint;
    next.total_files = total_files;

    if let Some(message) = &frame.message {
        next.message = Some(message.clone());
    } else if frame.status == FrameStatus::Error {
        next.message = Some("Download failed".to_string());
    } else if frame.status == FrameStatus::Cancelled {
        next.message = Some("Download cancelled".to_string());
    }

    if frame.current_file.is_some() {
        next.current_file = frame.current_file.clone();
    }

    if status == DownloadStatus::Completed {
        match total_bytes {
            Some(total) if !total_bytes_is_hint => next.downloaded_bytes = total,
            _ => {}
        }
        if let Some(total) = total_files {
            next.downloaded_files = total;
        }
    }
    if status.is_terminal() {
        next.current_file = None;
    }

    next.updated_at = Utc::now();
    Ok(Some(next))
}

fn next_status(current: DownloadStatus, frame: FrameStatus) -> DownloadStatus {
    match frame {
        FrameStatus::Start => match current {
            DownloadStatus::Queued => DownloadStatus::Starting,
            other => other,
        },
        FrameStatus::Progress => DownloadStatus::InProgress,
        FrameStatus::Completed => DownloadStatus::Completed,
        FrameStatus::Cancelled => DownloadStatus::Cancelled,
        FrameStatus::Error => DownloadStatus::Errored,
    }
}

fn advance(counter: &'static str, previous: u64, received: Option<u64>) -> Result<u64, FrameError> {
    match received {
        Some(received) if received < previous => Err(FrameError::OutOfOrder {
            counter,
            previous,
            received,
        }),
        Some(received) => Ok(received),
        None => Ok(previous),
    }
}

fn within_total(counter: &'static str, downloaded: u64, total: Option<u64>) -> Result<(), FrameError> {
    match total {
        Some(total) if downloaded > total => Err(FrameError::ExceedsTotal {
            counter,
            downloaded,
            total,
        }),
        _ => Ok(()),
    }
}
