//! Test utilities for the updater
//!
//! Helpers shared by the unit tests and the integration tests: logging
//! initialization, an in-process HTTP server standing in for the update host,
//! and a [`Restart`] implementation that records instead of exiting.
//!
//! # Example
//!
//! ```rust,no_run
//! use easylaw_updater::test_utils::http::{Route, TestServer};
//!
//! # async fn example() -> std::io::Result<()> {
//! let server = TestServer::start(vec![(
//!     "/latest.json",
//!     Route::ok(r#"{"version": "1.3.0", "download_url": "http://localhost/app"}"#),
//! )])
//! .await?;
//! let manifest_url = server.url("/latest.json");
//! # Ok(())
//! # }
//! ```

pub mod http;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::core::UpdateError;
use crate::upgrade::Restart;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Only the first call has any effect. Uses `level` when given, otherwise
/// `RUST_LOG`; with neither, logging stays off.
///
/// ```bash
/// RUST_LOG=easylaw_updater=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}

/// [`Restart`] that records the requested executable instead of launching
/// it, so a test can observe the `Restarting` state without exiting.
#[derive(Debug, Default)]
pub struct RecordingRestarter {
    launched: Mutex<Vec<PathBuf>>,
    fail: bool,
}

impl RecordingRestarter {
    /// A restarter whose spawn always fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            launched: Mutex::default(),
            fail: true,
        }
    }

    /// Executables passed to [`Restart::restart`] so far.
    pub fn launched(&self) -> Vec<PathBuf> {
        self.launched.lock().map(|launched| launched.clone()).unwrap_or_default()
    }
}

impl Restart for RecordingRestarter {
    fn restart(&self, executable: &Path) -> Result<(), UpdateError> {
        if let Ok(mut launched) = self.launched.lock() {
            launched.push(executable.to_path_buf());
        }
        if self.fail {
            return Err(UpdateError::SpawnFailed {
                path: executable.to_path_buf(),
                reason: "spawning disabled in test".to_string(),
            });
        }
        Ok(())
    }
}
