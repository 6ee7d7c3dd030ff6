//! Global constants used by the updater.
//!
//! File names, persisted-state keys, and the default timeouts live here so
//! the orchestrator, the CLI, and the tests agree on them.

use std::time::Duration;

/// Version of the running binary, baked in at compile time.
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Manifest URL shipped in unconfigured builds.
///
/// A build that still carries this template refuses to perform a check and
/// reports `NotConfigured` instead.
pub const PLACEHOLDER_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/YOUR_GITHUB_USER/YOUR_REPOSITORY/main/updates/latest_version.json";

/// Template tokens that mark a manifest URL as unconfigured.
pub const PLACEHOLDER_TOKENS: &[&str] = &["YOUR_GITHUB_USER", "YOUR_REPOSITORY", "NOT_CONFIGURED"];

/// File name of the persisted update state, stored next to the executable.
pub const STATE_FILE_NAME: &str = "updater_state.toml";

/// File name of the updater configuration, stored next to the executable.
pub const CONFIG_FILE_NAME: &str = "updater.toml";

/// Table holding the update bookkeeping inside the state file.
pub const STATE_SECTION: &str = "update_settings";

/// Key of the last-check epoch timestamp inside [`STATE_SECTION`].
pub const STATE_KEY_LAST_CHECK: &str = "last_update_check_timestamp";

/// Sentinel meaning "never checked".
pub const NEVER_CHECKED: f64 = 0.0;

/// Suffix appended to the executable path for the rollback copy.
pub const BACKUP_SUFFIX: &str = ".old";

/// Suffix of an in-flight download.
pub const PARTIAL_SUFFIX: &str = ".part";

/// Prefix of downloaded artifact file names.
pub const ARTIFACT_PREFIX: &str = "EasyLaw";

/// Default interval between automatic checks (24 hours).
pub const DEFAULT_CHECK_INTERVAL_HOURS: f64 = 24.0;

/// Default manifest request timeout (15 seconds).
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(15);

/// Default artifact download timeout (5 minutes).
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Pause between the restart notice and process exit (200ms).
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_millis(200);

/// Buffer size for writing the artifact to disk (64 KiB).
pub const DOWNLOAD_BUFFER_SIZE: usize = 64 * 1024;

/// Attempts made when restoring a backup over a possibly locked file.
pub const RESTORE_MAX_ATTEMPTS: u32 = 3;

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("easylaw-updater/", env!("CARGO_PKG_VERSION"));

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "EASYLAW_UPDATER_CONFIG";

/// Environment variable that disables progress bars.
pub const NO_PROGRESS_ENV: &str = "EASYLAW_NO_PROGRESS";
