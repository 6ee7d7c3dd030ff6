//! Relaunching the application after an update.
//!
//! The new process is detached from the current one so it survives the
//! `exit(0)` that follows.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{error, info};

use crate::core::UpdateError;

/// Launches the freshly installed executable and ends the current process.
///
/// The orchestrator only talks to this trait, so embedders (and tests) can
/// replace the default process-level behaviour.
pub trait Restart: Send + Sync {
    /// Start `executable` as an independent process and terminate this one.
    ///
    /// Returns only when spawning failed. The current process must then keep
    /// running: the installation on disk is already the new version and the
    /// user can relaunch it manually.
    fn restart(&self, executable: &Path) -> Result<(), UpdateError>;
}

/// Default [`Restart`] implementation backed by [`std::process::Command`].
#[derive(Debug, Clone)]
pub struct ProcessRestarter {
    delay: Duration,
}

impl ProcessRestarter {
    /// `delay` is the pause between spawning the new process and exiting,
    /// giving a pending "restarting" notice time to be seen.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self {
            delay,
        }
    }
}

impl Restart for ProcessRestarter {
    fn restart(&self, executable: &Path) -> Result<(), UpdateError> {
        let pid = spawn_detached(executable)?;
        info!("Started {} (pid {pid}), exiting", executable.display());
        std::thread::sleep(self.delay);
        std::process::exit(0);
    }
}

/// Spawn `executable` so that it outlives the current process. Returns the
/// child's pid.
pub fn spawn_detached(executable: &Path) -> Result<u32, UpdateError> {
    let mut command = Command::new(executable);
    command.stdin(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    match command.spawn() {
        Ok(child) => Ok(child.id()),
        Err(e) => {
            error!("Could not launch {}: {e}", executable.display());
            Err(UpdateError::SpawnFailed {
                path: PathBuf::from(executable),
                reason: e.to_string(),
            })
        }
    }
}
