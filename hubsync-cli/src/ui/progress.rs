//! Live progress board: one line per download.
//!
//! ```text
//! org/model                ⠋ ████████░░░░░░░░  50%  1.50 GB / 3.00 GB
//! org/other                ✔ ████████████████ 100%  Download complete
//! ```

use std::collections::HashMap;
use std::time::Duration;

use console::{style, Color};
use hubsync::download::projection::{project, render_bar, ProgressView, PROGRESS_BAR_WIDTH};
use hubsync::download::{DownloadKey, DownloadRecord};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

const TICK_INTERVAL: Duration = Duration::from_millis(120);
const LINE_TEMPLATE: &str = "{prefix:<24} {spinner} {msg}";

/// Tracks one indicatif line per download key.
pub struct ProgressBoard {
    multi: MultiProgress,
    bars: HashMap<DownloadKey, ProgressBar>,
}

impl ProgressBoard {
    /// Board drawn to stderr.
    pub fn new() -> Self {
        Self::with_multi(MultiProgress::new())
    }

    /// Board that draws nothing.
    #[cfg(test)]
    pub fn hidden() -> Self {
        Self::with_multi(MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden()))
    }

    fn with_multi(multi: MultiProgress) -> Self {
        Self {
            multi,
            bars: HashMap::new(),
        }
    }

    /// Redraw the line for a record, adding it if it is new.
    pub fn update(&mut self, record: &DownloadRecord) {
        let view = project(record);
        let line = render_line(&view);

        let bar = self.bar(&record.key);
        if bar.is_finished() {
            return;
        }

        match view {
            ProgressView::Finished { .. } => bar.finish_with_message(line),
            ProgressView::Cancelled { .. } | ProgressView::Failed { .. } => {
                bar.abandon_with_message(line)
            }
            ProgressView::Pending { .. } | ProgressView::Running { .. } => bar.set_message(line),
        }
    }

    /// Stop animating every line that has not reached a final state.
    pub fn finish(&self) {
        for bar in self.bars.values() {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
    }

    fn bar(&mut self, key: &DownloadKey) -> &ProgressBar {
        let multi = &self.multi;
        self.bars.entry(key.clone()).or_insert_with(|| {
            let bar = multi.add(ProgressBar::new_spinner());
            let style = ProgressStyle::with_template(LINE_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            bar.set_style(style);
            bar.set_prefix(key.to_string());
            bar.enable_steady_tick(TICK_INTERVAL);
            bar
        })
    }
}

impl Default for ProgressBoard {
    fn default() -> Self {
        Self::new()
    }
}

/// Text shown after the key and spinner.
pub fn render_line(view: &ProgressView) -> String {
    match view {
        ProgressView::Pending { message } => format!(
            "{}       {}",
            style(render_bar(0, PROGRESS_BAR_WIDTH)).dim(),
            message
        ),
        ProgressView::Running {
            percent,
            detail,
            current_file,
        } => {
            let mut line = match percent {
                Some(percent) => format!(
                    "{} {:>3}%  {}",
                    style(render_bar(*percent, PROGRESS_BAR_WIDTH)).fg(progress_color(*percent)),
                    percent,
                    detail
                ),
                None => format!(
                    "{}       {}",
                    style(render_bar(0, PROGRESS_BAR_WIDTH)).dim(),
                    detail
                ),
            };
            if let Some(file) = current_file {
                line.push_str(&format!("  {}", style(file).dim()));
            }
            line
        }
        ProgressView::Finished { message } => format!(
            "{} 100%  {}",
            style(render_bar(100, PROGRESS_BAR_WIDTH)).green(),
            message
        ),
        ProgressView::Cancelled { message } => format!("{}", style(message).yellow()),
        ProgressView::Failed { message } => format!("{}", style(message).red()),
    }
}

/// Bar color for a percentage.
fn progress_color(percent: u8) -> Color {
    match percent {
        0..=25 => Color::Yellow,
        26..=75 => Color::Cyan,
        _ => Color::Green,
    }
}
