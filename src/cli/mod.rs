//! Command-line interface for the EasyLaw updater.
//!
//! The CLI is the UI collaborator of the update orchestrator: it turns
//! [`UpdateEvent`](crate::upgrade::UpdateEvent)s into terminal output and
//! prompts, and turns user answers into orchestrator calls.
//!
//! # Commands
//!
//! - `check` - Check for a new version now and offer to install it
//! - `startup` - Run the automatic check if one is due (used by the application launcher)
//! - `status` - Show version, last check time, and backup information
//! - `rollback` - Restore the executable saved by the last update
//!
//! # Global Options
//!
//! - `--verbose` - Enable debug output
//! - `--quiet` - Only log errors
//! - `--config` - Path to a custom `updater.toml`
//! - `--manifest-url` - Override the configured manifest URL
//! - `--state-file` - Override the persisted state location
//! - `--executable` - Override the executable that gets replaced
//! - `--no-progress` - Disable progress bars
//!
//! # Examples
//!
//! ```bash
//! easylaw-updater check
//! easylaw-updater --manifest-url https://updates.example.com/latest.json check --yes
//! easylaw-updater startup
//! easylaw-updater status
//! easylaw-updater rollback
//! ```

mod check;
mod rollback;
mod status;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::upgrade::{CheckKind, UpdateConfig};

pub use check::CheckArgs;

/// Main CLI structure for the updater.
#[derive(Parser, Debug)]
#[command(
    name = "easylaw-updater",
    about = "Check for, download, and install EasyLaw updates",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the updater configuration file.
    ///
    /// Defaults to `updater.toml` next to the executable, or
    /// `EASYLAW_UPDATER_CONFIG` when set.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Manifest URL, overriding the configuration file.
    #[arg(long, global = true)]
    manifest_url: Option<String>,

    /// Persisted state file, overriding the configuration file.
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,

    /// Executable to update, overriding the running one.
    #[arg(long, global = true)]
    executable: Option<PathBuf>,

    /// Disable progress bars.
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check for a new version now.
    ///
    /// Always contacts the update server, regardless of when the last check
    /// happened, and reports the result.
    Check(CheckArgs),

    /// Run the automatic update check if it is due.
    ///
    /// Silent unless a new version is found.
    Startup(CheckArgs),

    /// Show version and update status.
    Status,

    /// Restore the executable saved by the last update.
    Rollback,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        self.init_logging();
        let config = self.load_config().await?;

        match self.command {
            Commands::Check(args) => {
                check::execute(config, CheckKind::Manual, &args, self.no_progress).await
            }
            Commands::Startup(args) => {
                check::execute(config, CheckKind::Automatic, &args, self.no_progress).await
            }
            Commands::Status => status::execute(config).await,
            Commands::Rollback => rollback::execute(config).await,
        }
    }

    /// Log filter: `RUST_LOG` when set, otherwise derived from the flags.
    fn log_filter(&self) -> EnvFilter {
        let level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "warn"
        };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    }

    fn init_logging(&self) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(self.log_filter())
            .with_writer(std::io::stderr)
            .without_time()
            .try_init();
    }

    /// Configuration file plus command-line overrides.
    async fn load_config(&self) -> Result<UpdateConfig> {
        let mut config = UpdateConfig::load(self.config.as_deref()).await?;
        if let Some(url) = &self.manifest_url {
            config.manifest_url.clone_from(url);
        }
        if let Some(path) = &self.state_file {
            config.state_file = Some(path.clone());
        }
        if let Some(path) = &self.executable {
            config.executable_path = Some(path.clone());
        }
        Ok(config)
    }
}
