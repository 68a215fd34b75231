//! Transfer progress display for the `send-file` command.

use indicatif::{ProgressBar, ProgressStyle};

/// A progress bar tracking one outbound or inbound file transfer.
pub struct TransferProgress {
    bar: ProgressBar,
}

impl TransferProgress {
    /// Create a new progress tracker for a transfer of `total` chunks.
    #[must_use]
    pub fn new(total: u32, label: &str) -> Self {
        let bar = ProgressBar::new(u64::from(total));
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} chunks")
                .expect("progress bar template is valid")
                .progress_chars("#>-"),
        );
        bar.set_message(label.to_string());
        Self { bar }
    }

    /// Advance to `received` chunks out of the transfer's total.
    pub fn set_received(&self, received: u32) {
        self.bar.set_position(u64::from(received));
    }

    /// Mark the transfer complete.
    pub fn finish(&self, message: String) {
        self.bar.finish_with_message(message);
    }
}

/// Render a byte count with the appropriate unit suffix.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[unit])
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}
