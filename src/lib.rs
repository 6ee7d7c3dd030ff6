//! EasyLaw updater - self-update subsystem for the EasyLaw desktop client
//!
//! Detects that a newer build has been published, downloads it, replaces the
//! running executable, and restarts the application. A failure at any step
//! leaves a working installation behind.
//!
//! # Architecture Overview
//!
//! ```text
//! UpdateHandle ──commands──► coordinator task ◄──messages── check worker
//!      ▲                          │       ▲                 download worker
//!      └────── UpdateEvent ◄──────┘       │
//!                                 UpdateStateStore (sole owner)
//! ```
//!
//! A single coordinator task owns the state machine and the persisted "last
//! check" timestamp. Network work runs on separate worker tasks that report
//! back by message only; at most one check and one download are in flight.
//!
//! ## Key Features
//!
//! - **Throttled checks**: automatic checks run at most once per interval, even across restarts
//! - **Streaming download**: progress at chunk granularity, cooperative cancellation
//! - **Safe replacement**: `<exe>.old` backup, rollback on failure, manual `rollback` command
//! - **Detached restart**: the new executable outlives the process that installed it
//!
//! # Core Modules
//!
//! - [`upgrade`] - State store, manifest fetcher, downloader, replacer, restarter, orchestrator
//! - [`core`] - Error taxonomy and user-facing error rendering
//! - [`cli`] - `check`, `startup`, `status`, and `rollback` commands
//! - [`constants`] - File names, state keys, and default timeouts
//! - [`utils`] - Terminal progress display
//!
//! # Configuration (updater.toml)
//!
//! ```toml
//! manifest_url = "https://raw.githubusercontent.com/acme/easylaw/main/updates/latest_version.json"
//! check_interval_hours = 24
//! check_timeout_secs = 15
//! download_timeout_secs = 300
//! ```
//!
//! # Manifest Format
//!
//! ```json
//! {"version": "1.3.0", "download_url": "https://example.com/EasyLaw-1.3.0.exe"}
//! ```

pub mod cli;
pub mod constants;
pub mod core;
pub mod upgrade;
pub mod utils;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
