use anyhow::{Context, Result, anyhow, bail};
use clap::Args;
use colored::Colorize;
use std::io::Write;
use std::sync::Arc;
use tracing::debug;

use crate::core::UpdateError;
use crate::upgrade::{
    CheckKind, UpdateConfig, UpdateEvent, UpdateHandle, UpdateOrchestrator, UpdateOutcome,
};
use crate::utils::progress::DownloadBar;

/// Options shared by `check` and `startup`.
#[derive(Args, Debug, Clone, Default)]
pub struct CheckArgs {
    /// Install an available update without asking.
    #[arg(short, long)]
    pub yes: bool,
}

fn into_anyhow(error: Arc<UpdateError>) -> anyhow::Error {
    anyhow::Error::new(error)
}

/// Drive one check, and the download, install, and restart that may
/// follow it, printing progress as events arrive.
pub async fn execute(
    config: UpdateConfig,
    kind: CheckKind,
    args: &CheckArgs,
    no_progress: bool,
) -> Result<()> {
    let (handle, mut events) = UpdateOrchestrator::new(config)?.spawn();

    let started = match kind {
        CheckKind::Manual => {
            println!("{}", "Checking for updates...".cyan());
            handle.run_check(kind).await?
        }
        CheckKind::Automatic => handle.check_if_due().await?,
    };
    if !started {
        debug!("No update check started");
        return Ok(());
    }

    let mut bar: Option<DownloadBar> = None;
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c(), if bar.is_some() => {
                // The coordinator reports DownloadCancelled once the worker has stopped.
                handle.cancel_download().await?;
                continue;
            }
        };
        let Some(event) = event else {
            bail!("Update coordinator stopped unexpectedly");
        };

        match event {
            UpdateEvent::CheckStarted(_) => {}
            UpdateEvent::UpToDate {
                current,
            } => {
                println!("{}", format!("You are on the latest version ({current})").green());
            }
            UpdateEvent::UpdateFound {
                version,
                current,
            } => {
                println!("{}", format!("Update available: {current} -> {version}").green());
                if args.yes || confirm(&version).await? {
                    handle.start_download().await?;
                } else {
                    handle.decline_update().await?;
                    println!("Update skipped");
                    return Ok(());
                }
            }
            UpdateEvent::CheckFinished {
                kind,
                outcome,
            } => match outcome {
                UpdateOutcome::NoUpdateAvailable => return Ok(()),
                UpdateOutcome::CheckFailed(error) => {
                    if kind == CheckKind::Manual {
                        return Err(into_anyhow(error).context("Update check failed"));
                    }
                    debug!("Automatic update check failed: {error}");
                    return Ok(());
                }
                _ => {}
            },
            UpdateEvent::DownloadStarted {
                version,
            } => {
                println!("{}", format!("Downloading version {version}...").cyan());
                bar = Some(DownloadBar::new(&version, no_progress));
            }
            UpdateEvent::Progress(progress) => {
                if let Some(bar) = bar.as_mut() {
                    bar.update(&progress);
                }
            }
            UpdateEvent::DownloadFinished(artifact) => {
                if let Some(bar) = bar.take() {
                    bar.finish("downloaded");
                }
                debug!("Artifact saved to {}", artifact.local_path.display());
                println!("{}", "Installing update...".cyan());
            }
            UpdateEvent::DownloadFailed(error) => {
                if let Some(bar) = bar.take() {
                    bar.abandon("failed");
                }
                return Err(into_anyhow(error).context("Download failed"));
            }
            UpdateEvent::DownloadCancelled => {
                if let Some(bar) = bar.take() {
                    bar.abandon("cancelled");
                }
                println!("{}", "Download cancelled".yellow());
                return Ok(());
            }
            UpdateEvent::ReplaceSucceeded(path) => {
                println!("{}", format!("Update installed at {}", path.display()).green());
            }
            UpdateEvent::ReplaceFailed(error) => {
                if !error.requires_user_action() {
                    println!("{}", "Your current installation was left unchanged".yellow());
                }
                return Err(into_anyhow(error).context("Update could not be installed"));
            }
            UpdateEvent::RestartImminent(path) => {
                println!("{}", format!("Restarting {}...", path.display()).cyan());
                return wait_for_restart(&handle, &mut events).await;
            }
            UpdateEvent::RestartFailed(error) => {
                return Err(into_anyhow(error).context("Update installed but restart failed"));
            }
        }
    }
}

/// The process normally exits during the restart; only a failure or a
/// non-exiting restarter comes back here.
async fn wait_for_restart(
    handle: &UpdateHandle,
    events: &mut tokio::sync::mpsc::UnboundedReceiver<UpdateEvent>,
) -> Result<()> {
    let snapshot = handle.snapshot().await?;
    while let Ok(event) = events.try_recv() {
        if let UpdateEvent::RestartFailed(error) = event {
            return Err(into_anyhow(error).context("Update installed but restart failed"));
        }
    }
    debug!("Restart handed off, coordinator state {:?}", snapshot.state);
    Ok(())
}

async fn confirm(version: &str) -> Result<bool> {
    print!("Download and install version {version} now? [y/N] ");
    std::io::stdout().flush().context("Failed to write prompt")?;

    let answer = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await
    .map_err(|e| anyhow!("Prompt task failed: {e}"))?
    .context("Failed to read answer")?;

    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
