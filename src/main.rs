//! EasyLaw updater entry point
//!
//! Parses the command line, runs the requested command, and renders any
//! failure as a user-friendly error with a suggestion.
//!
//! Commands:
//! - `check` - Check for updates now and offer to install them
//! - `startup` - Run the automatic check if it is due
//! - `status` - Show version and update status
//! - `rollback` - Restore the previous executable

use anyhow::Result;
use clap::Parser;
use easylaw_updater::cli;
use easylaw_updater::core::error::user_friendly_error;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(e) => {
            let error_ctx = user_friendly_error(e);
            error_ctx.display();
            std::process::exit(1);
        }
    }
}
