//! Chunk progress display with progress bars.

use chunkvault_core::{ProgressReceiver, ProgressSender, progress_channel};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinHandle;

/// Progress bar fed by pipeline progress events
pub struct ChunkProgress {
    bar: ProgressBar,
    renderer: JoinHandle<()>,
}

impl ChunkProgress {
    /// Create a bar for `file_name` and the sender that drives it
    ///
    /// The bar length follows the totals reported by the pipeline, since the
    /// number of chunks to upload is only known once deduplication has run.
    #[must_use]
    pub fn start(file_name: &str, verb: &str) -> (Self, ProgressSender) {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} chunks ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        bar.set_message(format!("{verb}: {file_name}"));

        let (tx, rx) = progress_channel();
        let renderer = tokio::spawn(render(bar.clone(), rx));

        (Self { bar, renderer }, tx)
    }

    /// Wait for outstanding events and finish with `msg`
    ///
    /// Every sender must be dropped first.
    pub async fn finish_with_message(self, msg: String) {
        let _ = self.renderer.await;
        self.bar.finish_with_message(msg);
    }

    /// Abandon the progress bar (for errors)
    pub async fn abandon(self) {
        let _ = self.renderer.await;
        self.bar.abandon();
    }
}

async fn render(bar: ProgressBar, mut rx: ProgressReceiver) {
    while let Some(event) = rx.recv().await {
        bar.set_length(event.total);
        bar.set_position(event.processed);
    }
}

/// Format bytes in human-readable format
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}

/// Format a deduplication ratio as a percentage
#[must_use]
pub fn format_ratio(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}
