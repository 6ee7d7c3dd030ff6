//! Self-update functionality for EasyLaw.
//!
//! This module detects that a newer build has been published, downloads it,
//! swaps it in for the running executable, and relaunches the application,
//! without leaving a broken installation behind when any step fails.
//!
//! # Architecture Overview
//!
//! - **[`UpdateStateStore`]**: persisted "last checked" timestamp that throttles automatic checks
//! - **[`VersionManifestFetcher`]**: one bounded GET of the remote `{version, download_url}` manifest
//! - **[`version`]**: semantic version ordering for the "is it newer?" decision
//! - **[`ArtifactDownloader`]**: streams the new executable to disk with progress and cancellation
//! - **[`BinaryReplacer`]**: backup, move, and rollback sequence around the running executable
//! - **[`ProcessRestarter`]**: launches the new executable and exits
//! - **[`UpdateOrchestrator`]**: the state machine tying them together
//!
//! ## Update Process Flow
//!
//! ```text
//! 1. Due check
//!    └── last check is 0.0 (never) or older than check_interval_hours
//!
//! 2. Check (background worker)
//!    ├── Refuse placeholder manifest URLs without any request
//!    ├── GET manifest (15s timeout)
//!    └── Compare remote version with the running one
//!
//! 3. Download (background worker, after user consent)
//!    ├── Stream to <artifact>.part, reporting progress
//!    └── Rename to the final artifact name once complete
//!
//! 4. Replace
//!    ├── <exe> -> <exe>.old
//!    ├── <artifact> -> <exe>, chmod 755
//!    └── Roll back to <exe>.old on failure
//!
//! 5. Restart
//!    └── Spawn <exe> detached, then exit
//! ```
//!
//! # Examples
//!
//! ```rust,no_run
//! use easylaw_updater::upgrade::{CheckKind, UpdateConfig, UpdateEvent, UpdateOrchestrator};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = UpdateConfig::load(None).await?;
//! let (handle, mut events) = UpdateOrchestrator::new(config)?.spawn();
//!
//! handle.check_if_due().await?;
//! while let Some(event) = events.recv().await {
//!     if let UpdateEvent::UpdateFound { version, .. } = event {
//!         println!("Version {version} is available");
//!         handle.start_download().await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

/// Updater configuration and its TOML representation.
pub mod config;
/// Streaming artifact download.
pub mod download;
/// Remote version manifest.
pub mod manifest;
/// The update coordinator and its handle.
pub mod orchestrator;
/// Executable replacement and rollback.
pub mod replace;
/// Relaunching the updated application.
pub mod restart;
/// Persisted check timestamp.
pub mod state;
/// Version parsing and comparison.
pub mod version;

pub use config::UpdateConfig;
pub use download::{ArtifactDownloader, CancelFlag, DownloadProgress, DownloadedArtifact};
pub use manifest::{UpdateManifest, VersionManifestFetcher};
pub use orchestrator::{
    CheckKind, Snapshot, UpdateEvent, UpdateHandle, UpdateOrchestrator, UpdateOutcome,
    UpdateState,
};
pub use replace::BinaryReplacer;
pub use restart::{ProcessRestarter, Restart};
pub use state::{UpdateStateStore, is_check_due, now_epoch_seconds};
pub use version::is_newer;
