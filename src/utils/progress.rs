//! Terminal progress display for update downloads.
//!
//! Wraps `indicatif` so the CLI can feed [`DownloadProgress`] notifications
//! straight into a bar. Servers that do not announce a length get a spinner
//! with a byte counter instead.
//!
//! # Environment Variables
//!
//! - `EASYLAW_NO_PROGRESS`: set to any value to hide all progress output

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::constants::NO_PROGRESS_ENV;
use crate::upgrade::DownloadProgress;

fn is_progress_disabled() -> bool {
    std::env::var(NO_PROGRESS_ENV).is_ok()
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:.bold.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸━")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{prefix:.bold.cyan} {spinner:.cyan} {bytes} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
}

/// Progress bar for a single artifact download.
pub struct DownloadBar {
    inner: ProgressBar,
    hidden: bool,
    sized: bool,
}

impl DownloadBar {
    /// A new bar labelled with `version`. Hidden when `hidden` is set or
    /// `EASYLAW_NO_PROGRESS` is present.
    #[must_use]
    pub fn new(version: &str, hidden: bool) -> Self {
        let hidden = hidden || is_progress_disabled();
        let inner = if hidden {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new_spinner();
            bar.set_style(spinner_style());
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        };
        inner.set_prefix(format!("v{version}"));

        Self {
            inner,
            hidden,
            sized: false,
        }
    }

    pub fn update(&mut self, progress: &DownloadProgress) {
        if let Some(total) = progress.total_bytes {
            if !self.sized && !self.hidden {
                self.inner.disable_steady_tick();
                self.inner.set_style(bar_style());
            }
            self.sized = true;
            self.inner.set_length(total);
        }
        self.inner.set_position(progress.bytes_received);
    }

    #[must_use]
    pub fn position(&self) -> u64 {
        self.inner.position()
    }

    pub fn finish(&self, message: &str) {
        self.inner.finish_with_message(message.to_string());
    }

    pub fn abandon(&self, message: &str) {
        self.inner.abandon_with_message(message.to_string());
    }
}
