//! The update state machine.
//!
//! ```text
//! Idle ─► Checking ─┬─► Idle                    (no update, failure)
//!                   └─► UpdateAvailable ─┬─► Idle (declined)
//!                                        └─► Downloading ─┬─► Idle (failed, cancelled)
//!                                                         └─► Replacing ─┬─► Idle (failed)
//!                                                                        └─► Restarting
//! ```
//!
//! [`UpdateOrchestrator::spawn`] moves all state into a single coordinator
//! task. Callers talk to it through a cloneable [`UpdateHandle`] and observe
//! it through a stream of [`UpdateEvent`]s. Check and download workers run as
//! separate tasks and only ever post messages back to the coordinator, so the
//! persisted state and the state machine have exactly one writer.
//!
//! The coordinator never waits for user input. Consent to download arrives
//! as a later [`UpdateHandle::start_download`] call.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::UpdateConfig;
use super::download::{ArtifactDownloader, CancelFlag, DownloadProgress, DownloadedArtifact};
use super::manifest::{UpdateManifest, VersionManifestFetcher};
use super::replace::BinaryReplacer;
use super::restart::{ProcessRestarter, Restart};
use super::state::{UpdateStateStore, is_check_due, now_epoch_seconds};
use super::version::is_newer;
use crate::core::UpdateError;

const COMMAND_BUFFER: usize = 32;

/// Who asked for a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    /// Launched by the application itself at startup. Silent unless an update
    /// is found; records the check time as soon as it is launched.
    Automatic,
    /// Requested by the user. Always reports its result; records the check
    /// time once it completes.
    Manual,
}

/// Terminal result of a check, download, or replacement.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    NoUpdateAvailable,
    UpdateAvailable(UpdateManifest),
    CheckFailed(Arc<UpdateError>),
    DownloadFailed(Arc<UpdateError>),
    ReplaceFailed(Arc<UpdateError>),
    ReplaceSucceeded(PathBuf),
}

impl UpdateOutcome {
    /// The error carried by a failed outcome.
    #[must_use]
    pub fn error(&self) -> Option<&UpdateError> {
        match self {
            Self::CheckFailed(e) | Self::DownloadFailed(e) | Self::ReplaceFailed(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateState {
    Idle,
    Checking(CheckKind),
    UpdateAvailable(UpdateManifest),
    Downloading {
        version: String,
        percent: Option<u8>,
    },
    Replacing {
        version: String,
    },
    /// The new executable is in place and the process is about to exit.
    Restarting {
        executable: PathBuf,
    },
}

/// Notifications for the UI collaborator, delivered in order.
#[derive(Debug, Clone)]
pub enum UpdateEvent {
    CheckStarted(CheckKind),
    /// Always sent once per check, whatever the result.
    CheckFinished {
        kind: CheckKind,
        outcome: UpdateOutcome,
    },
    UpdateFound {
        version: String,
        current: String,
    },
    /// Manual checks only.
    UpToDate {
        current: String,
    },
    DownloadStarted {
        version: String,
    },
    Progress(DownloadProgress),
    DownloadFinished(DownloadedArtifact),
    DownloadFailed(Arc<UpdateError>),
    DownloadCancelled,
    ReplaceSucceeded(PathBuf),
    /// Check [`UpdateError::requires_user_action`] before telling the user
    /// their installation is intact.
    ReplaceFailed(Arc<UpdateError>),
    RestartImminent(PathBuf),
    RestartFailed(Arc<UpdateError>),
}

/// Point-in-time view of the coordinator.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub state: UpdateState,
    pub last_outcome: Option<UpdateOutcome>,
    pub last_check: f64,
    pub current_version: String,
}

enum Command {
    IsCheckDue(oneshot::Sender<bool>),
    RunCheck {
        kind: CheckKind,
        reply: oneshot::Sender<Result<bool, UpdateError>>,
    },
    StartDownload(oneshot::Sender<Result<(), UpdateError>>),
    Decline(oneshot::Sender<bool>),
    CancelDownload(oneshot::Sender<bool>),
    Snapshot(oneshot::Sender<Snapshot>),
}

/// Messages from workers. Every message carries the id of the task that
/// produced it so results from a superseded task can be dropped.
enum WorkerMessage {
    CheckDone {
        task: u64,
        result: Result<UpdateManifest, UpdateError>,
    },
    Progress {
        task: u64,
        progress: DownloadProgress,
    },
    DownloadDone {
        task: u64,
    },
}

/// Cloneable front-end to a running orchestrator.
///
/// The coordinator shuts down once every handle is dropped, cancelling any
/// download still in flight.
#[derive(Clone)]
pub struct UpdateHandle {
    commands: mpsc::Sender<Command>,
}

impl UpdateHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, UpdateError> {
        let (reply, response) = oneshot::channel();
        self.commands.send(command(reply)).await.map_err(|_| UpdateError::ShutDown)?;
        response.await.map_err(|_| UpdateError::ShutDown)
    }

    /// Whether an automatic check should run now.
    pub async fn is_check_due(&self) -> Result<bool, UpdateError> {
        self.request(Command::IsCheckDue).await
    }

    /// Launch a check in the background.
    ///
    /// Returns `Ok(false)` when an automatic check was skipped because
    /// another operation is running. The same situation for a manual check is
    /// [`UpdateError::AlreadyInProgress`].
    pub async fn run_check(&self, kind: CheckKind) -> Result<bool, UpdateError> {
        self.request(|reply| Command::RunCheck {
            kind,
            reply,
        })
        .await?
    }

    /// Run an automatic check if one is due. Returns whether a check started.
    pub async fn check_if_due(&self) -> Result<bool, UpdateError> {
        if !self.is_check_due().await? {
            debug!("Automatic update check not due yet");
            return Ok(false);
        }
        self.run_check(CheckKind::Automatic).await
    }

    /// User consent: download the available update, then install it and
    /// restart without further confirmation.
    pub async fn start_download(&self) -> Result<(), UpdateError> {
        self.request(Command::StartDownload).await?
    }

    /// Dismiss an available update. Returns whether there was one.
    pub async fn decline_update(&self) -> Result<bool, UpdateError> {
        self.request(Command::Decline).await
    }

    /// Stop the running download and wait for its worker to exit.
    ///
    /// When this returns `Ok(true)` no worker is running and no artifact from
    /// the cancelled download is left on disk.
    pub async fn cancel_download(&self) -> Result<bool, UpdateError> {
        self.request(Command::CancelDownload).await
    }

    pub async fn snapshot(&self) -> Result<Snapshot, UpdateError> {
        self.request(Command::Snapshot).await
    }
}

struct ActiveCheck {
    task: u64,
    kind: CheckKind,
}

struct ActiveDownload {
    task: u64,
    version: String,
    cancel: CancelFlag,
    handle: JoinHandle<Result<DownloadedArtifact, UpdateError>>,
}

/// Builder for the update coordinator.
pub struct UpdateOrchestrator {
    config: UpdateConfig,
    store: UpdateStateStore,
    fetcher: VersionManifestFetcher,
    downloader: ArtifactDownloader,
    replacer: BinaryReplacer,
    restarter: Arc<dyn Restart>,
}

impl UpdateOrchestrator {
    /// Prepare an orchestrator from `config`. Nothing runs until
    /// [`spawn`](Self::spawn).
    pub fn new(config: UpdateConfig) -> Result<Self, UpdateError> {
        let executable = config.resolve_executable_path()?;
        let store = UpdateStateStore::new(config.resolve_state_file());
        let fetcher =
            VersionManifestFetcher::new(config.manifest_url.clone(), config.check_timeout())?;
        let downloader =
            ArtifactDownloader::new(config.resolve_download_dir()?, config.download_timeout())?;
        let restarter = Arc::new(ProcessRestarter::new(config.restart_delay()));

        Ok(Self {
            config,
            store,
            fetcher,
            downloader,
            replacer: BinaryReplacer::new(executable),
            restarter,
        })
    }

    /// Use a different way of relaunching the application.
    #[must_use]
    pub fn with_restarter(mut self, restarter: Arc<dyn Restart>) -> Self {
        self.restarter = restarter;
        self
    }

    /// Start the coordinator task. Must be called within a Tokio runtime.
    pub fn spawn(self) -> (UpdateHandle, mpsc::UnboundedReceiver<UpdateEvent>) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (events, events_rx) = mpsc::unbounded_channel();
        let (inbox_tx, inbox) = mpsc::unbounded_channel();

        let coordinator = Coordinator {
            config: self.config,
            store: self.store,
            fetcher: self.fetcher,
            downloader: self.downloader,
            replacer: self.replacer,
            restarter: self.restarter,
            events,
            inbox_tx,
            state: UpdateState::Idle,
            last_outcome: None,
            next_task: 0,
            check: None,
            download: None,
        };
        tokio::spawn(coordinator.run(commands, inbox));

        (
            UpdateHandle {
                commands: commands_tx,
            },
            events_rx,
        )
    }
}

struct Coordinator {
    config: UpdateConfig,
    store: UpdateStateStore,
    fetcher: VersionManifestFetcher,
    downloader: ArtifactDownloader,
    replacer: BinaryReplacer,
    restarter: Arc<dyn Restart>,
    events: mpsc::UnboundedSender<UpdateEvent>,
    inbox_tx: mpsc::UnboundedSender<WorkerMessage>,
    state: UpdateState,
    last_outcome: Option<UpdateOutcome>,
    next_task: u64,
    check: Option<ActiveCheck>,
    download: Option<ActiveDownload>,
}

impl Coordinator {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut inbox: mpsc::UnboundedReceiver<WorkerMessage>,
    ) {
        debug!("Update coordinator started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(message) = inbox.recv() => self.handle_message(message).await,
            }
        }

        if self.download.is_some() {
            info!("Update coordinator shutting down, stopping download");
            self.cancel_download().await;
        }
        debug!("Update coordinator stopped");
    }

    fn emit(&self, event: UpdateEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn next_task_id(&mut self) -> u64 {
        self.next_task += 1;
        self.next_task
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::IsCheckDue(reply) => {
                let last = self.store.get_last_check().await;
                let _ = reply.send(is_check_due(
                    last,
                    now_epoch_seconds(),
                    self.config.check_interval_hours,
                ));
            }
            Command::RunCheck {
                kind,
                reply,
            } => {
                let _ = reply.send(self.start_check(kind).await);
            }
            Command::StartDownload(reply) => {
                let _ = reply.send(self.start_download());
            }
            Command::Decline(reply) => {
                let declined = matches!(self.state, UpdateState::UpdateAvailable(_));
                if declined {
                    info!("Update declined");
                    self.state = UpdateState::Idle;
                }
                let _ = reply.send(declined);
            }
            Command::CancelDownload(reply) => {
                let _ = reply.send(self.cancel_download().await);
            }
            Command::Snapshot(reply) => {
                let snapshot = Snapshot {
                    state: self.state.clone(),
                    last_outcome: self.last_outcome.clone(),
                    last_check: self.store.get_last_check().await,
                    current_version: self.config.current_version.clone(),
                };
                let _ = reply.send(snapshot);
            }
        }
    }

    async fn handle_message(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::CheckDone {
                task,
                result,
            } => self.finish_check(task, result).await,
            WorkerMessage::Progress {
                task,
                progress,
            } => {
                let Some(download) = self.download.as_ref().filter(|d| d.task == task) else {
                    debug!("Ignoring progress from stale download task {task}");
                    return;
                };
                self.state = UpdateState::Downloading {
                    version: download.version.clone(),
                    percent: progress.percent,
                };
                self.emit(UpdateEvent::Progress(progress));
            }
            WorkerMessage::DownloadDone {
                task,
            } => {
                if self.download.as_ref().is_none_or(|d| d.task != task) {
                    debug!("Ignoring completion of stale download task {task}");
                    return;
                }
                if let Some(download) = self.download.take() {
                    let result = join_worker("download", download.handle).await;
                    self.finish_download(result).await;
                }
            }
        }
    }

    async fn start_check(&mut self, kind: CheckKind) -> Result<bool, UpdateError> {
        let busy = if self.check.is_some() {
            Some("update check")
        } else if self.download.is_some()
            || matches!(self.state, UpdateState::Replacing { .. } | UpdateState::Restarting { .. })
        {
            Some("update installation")
        } else {
            None
        };

        if let Some(operation) = busy {
            return match kind {
                CheckKind::Automatic => {
                    debug!("Skipping automatic check, {operation} is already running");
                    Ok(false)
                }
                CheckKind::Manual => Err(UpdateError::AlreadyInProgress {
                    operation: operation.to_string(),
                }),
            };
        }

        let task = self.next_task_id();
        let fetcher = self.fetcher.clone();
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            let result = supervise("update check", async move { fetcher.fetch().await }).await;
            let _ = inbox.send(WorkerMessage::CheckDone {
                task,
                result,
            });
        });

        info!("Started {kind:?} update check");
        self.check = Some(ActiveCheck {
            task,
            kind,
        });
        self.state = UpdateState::Checking(kind);
        self.emit(UpdateEvent::CheckStarted(kind));

        // Throttles automatic checks even if this one never completes.
        if kind == CheckKind::Automatic {
            self.store.set_last_check(None).await;
        }
        Ok(true)
    }

    async fn finish_check(&mut self, task: u64, result: Result<UpdateManifest, UpdateError>) {
        let Some(check) = self.check.take_if(|c| c.task == task) else {
            debug!("Ignoring result of stale check task {task}");
            return;
        };
        let kind = check.kind;
        if kind == CheckKind::Manual {
            self.store.set_last_check(None).await;
        }

        let current = self.config.current_version.clone();
        let outcome = match result.and_then(|manifest| {
            is_newer(&manifest.version, &current).map(|newer| (manifest, newer))
        }) {
            Ok((manifest, true)) => {
                info!("Update available: {} (running {current})", manifest.version);
                self.state = UpdateState::UpdateAvailable(manifest.clone());
                self.emit(UpdateEvent::UpdateFound {
                    version: manifest.version.clone(),
                    current: current.clone(),
                });
                UpdateOutcome::UpdateAvailable(manifest)
            }
            Ok((manifest, false)) => {
                debug!("Latest version {} is not newer than {current}", manifest.version);
                self.state = UpdateState::Idle;
                if kind == CheckKind::Manual {
                    self.emit(UpdateEvent::UpToDate {
                        current: current.clone(),
                    });
                }
                UpdateOutcome::NoUpdateAvailable
            }
            Err(e) => {
                match kind {
                    CheckKind::Automatic => warn!("Automatic update check failed: {e}"),
                    CheckKind::Manual => error!("Update check failed: {e}"),
                }
                self.state = UpdateState::Idle;
                UpdateOutcome::CheckFailed(Arc::new(e))
            }
        };

        self.last_outcome = Some(outcome.clone());
        self.emit(UpdateEvent::CheckFinished {
            kind,
            outcome,
        });
    }

    fn start_download(&mut self) -> Result<(), UpdateError> {
        if self.download.is_some() {
            return Err(UpdateError::AlreadyInProgress {
                operation: "download".to_string(),
            });
        }
        let UpdateState::UpdateAvailable(manifest) = &self.state else {
            return Err(UpdateError::NothingToDownload);
        };
        let manifest = manifest.clone();

        let task = self.next_task_id();
        let cancel = CancelFlag::new();
        let downloader = self.downloader.clone();
        let inbox = self.inbox_tx.clone();
        let progress_inbox = self.inbox_tx.clone();
        let flag = cancel.clone();
        let url = manifest.download_url.clone();
        let version = manifest.version.clone();

        let handle = tokio::spawn(async move {
            let result = supervise("download", async move {
                downloader
                    .download(&url, &version, &flag, |progress| {
                        let _ = progress_inbox.send(WorkerMessage::Progress {
                            task,
                            progress,
                        });
                    })
                    .await
            })
            .await;
            let _ = inbox.send(WorkerMessage::DownloadDone {
                task,
            });
            result
        });

        self.download = Some(ActiveDownload {
            task,
            version: manifest.version.clone(),
            cancel,
            handle,
        });
        self.state = UpdateState::Downloading {
            version: manifest.version.clone(),
            percent: None,
        };
        self.emit(UpdateEvent::DownloadStarted {
            version: manifest.version,
        });
        Ok(())
    }

    async fn cancel_download(&mut self) -> bool {
        let Some(download) = self.download.take() else {
            return false;
        };

        info!("Cancelling download of version {}", download.version);
        download.cancel.cancel();
        match join_worker("download", download.handle).await {
            Ok(artifact) => {
                // Finished before it saw the flag; cancel still wins.
                debug!("Download completed before cancellation, discarding it");
                if let Err(e) = tokio::fs::remove_file(&artifact.local_path).await {
                    warn!("Could not remove {}: {e}", artifact.local_path.display());
                }
            }
            Err(UpdateError::Cancelled) => {}
            Err(e) => debug!("Download ended with {e} while cancelling"),
        }

        self.state = UpdateState::Idle;
        self.emit(UpdateEvent::DownloadCancelled);
        true
    }

    async fn finish_download(&mut self, result: Result<DownloadedArtifact, UpdateError>) {
        let artifact = match result {
            Ok(artifact) => artifact,
            Err(e) => {
                error!("Download failed: {e}");
                let error = Arc::new(e);
                self.state = UpdateState::Idle;
                self.last_outcome = Some(UpdateOutcome::DownloadFailed(error.clone()));
                self.emit(UpdateEvent::DownloadFailed(error));
                return;
            }
        };

        self.emit(UpdateEvent::DownloadFinished(artifact.clone()));
        self.state = UpdateState::Replacing {
            version: artifact.version.clone(),
        };

        let executable = match self.replacer.replace(&artifact.local_path).await {
            Ok(executable) => executable,
            Err(e) => {
                let error = Arc::new(e);
                self.state = UpdateState::Idle;
                self.last_outcome = Some(UpdateOutcome::ReplaceFailed(error.clone()));
                self.emit(UpdateEvent::ReplaceFailed(error));
                return;
            }
        };

        info!("Version {} installed", artifact.version);
        self.last_outcome = Some(UpdateOutcome::ReplaceSucceeded(executable.clone()));
        self.emit(UpdateEvent::ReplaceSucceeded(executable.clone()));
        self.state = UpdateState::Restarting {
            executable: executable.clone(),
        };
        self.emit(UpdateEvent::RestartImminent(executable.clone()));

        let restarter = self.restarter.clone();
        let target = executable.clone();
        let restarted = tokio::task::spawn_blocking(move || restarter.restart(&target))
            .await
            .unwrap_or_else(|e| {
                Err(UpdateError::Worker {
                    operation: "restart".to_string(),
                    reason: e.to_string(),
                })
            });

        if let Err(e) = restarted {
            error!("Restart failed: {e}");
            self.state = UpdateState::Idle;
            self.emit(UpdateEvent::RestartFailed(Arc::new(e)));
        }
    }
}

/// Run `work` on its own task so a panic becomes an error value instead of
/// tearing down the caller.
async fn supervise<T, F>(operation: &str, work: F) -> Result<T, UpdateError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, UpdateError>> + Send + 'static,
{
    join_worker(operation, tokio::spawn(work)).await
}

async fn join_worker<T>(
    operation: &str,
    handle: JoinHandle<Result<T, UpdateError>>,
) -> Result<T, UpdateError> {
    handle.await.unwrap_or_else(|e| {
        Err(UpdateError::Worker {
            operation: operation.to_string(),
            reason: e.to_string(),
        })
    })
}
