//! Utility modules for the updater.

pub mod progress;

pub use progress::DownloadBar;
