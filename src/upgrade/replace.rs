//! In-place replacement of the running executable, with rollback.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::constants::{BACKUP_SUFFIX, RESTORE_MAX_ATTEMPTS};
use crate::core::{RollbackStatus, UpdateError};

/// Swaps the running executable for a downloaded one.
///
/// The swap is a sequence of renames around a rollback point:
///
/// ```text
/// 1. delete a stale <exe>.old left by an earlier failed attempt
/// 2. rename <exe> -> <exe>.old            (rollback point)
/// 3. move   <artifact> -> <exe>
/// 4. chmod 755 <exe>                       (Unix only)
/// ```
///
/// If step 3 or 4 fails, whatever now sits at `<exe>` is removed and the
/// backup is renamed back. Once step 2 has happened the replacer always ends
/// with either the new binary in place or the original restored; if even the
/// rollback fails, the error carries the backup path so the user can restore
/// it by hand.
///
/// On success the backup stays on disk as an audit trail and as the source
/// for a manual [`restore_backup`](Self::restore_backup).
pub struct BinaryReplacer {
    executable_path: PathBuf,
    backup_path: PathBuf,
}

impl BinaryReplacer {
    pub fn new(executable_path: impl Into<PathBuf>) -> Self {
        let executable_path = executable_path.into();
        let mut backup = executable_path.as_os_str().to_owned();
        backup.push(BACKUP_SUFFIX);

        Self {
            executable_path,
            backup_path: PathBuf::from(backup),
        }
    }

    pub fn executable_path(&self) -> &Path {
        &self.executable_path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    pub fn backup_exists(&self) -> bool {
        self.backup_path.exists()
    }

    /// Install `artifact` over the executable. Returns the executable path.
    pub async fn replace(&self, artifact: &Path) -> Result<PathBuf, UpdateError> {
        info!(
            "Replacing {} with {}",
            self.executable_path.display(),
            artifact.display()
        );

        if self.backup_path.exists() {
            debug!("Removing stale backup at {}", self.backup_path.display());
            fs::remove_file(&self.backup_path).await.map_err(|e| UpdateError::Replace {
                reason: format!(
                    "could not remove stale backup {}: {e}",
                    self.backup_path.display()
                ),
                rollback: RollbackStatus::NotAttempted,
            })?;
        }

        fs::rename(&self.executable_path, &self.backup_path).await.map_err(|e| {
            UpdateError::Replace {
                reason: format!(
                    "could not move {} aside: {e}",
                    self.executable_path.display()
                ),
                rollback: RollbackStatus::NotAttempted,
            }
        })?;

        if let Err(reason) = self.install(artifact).await {
            warn!("Installing the new executable failed: {reason}");
            let rollback = self.roll_back().await;
            match &rollback {
                RollbackStatus::Failed { .. } => error!("{rollback}"),
                _ => info!("{rollback}"),
            }
            return Err(UpdateError::Replace {
                reason,
                rollback,
            });
        }

        info!("Executable replaced; previous version kept at {}", self.backup_path.display());
        Ok(self.executable_path.clone())
    }

    async fn install(&self, artifact: &Path) -> Result<(), String> {
        move_file(artifact, &self.executable_path).await.map_err(|e| {
            format!(
                "could not move {} into place: {e}",
                artifact.display()
            )
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.executable_path, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| format!("could not mark new executable as executable: {e}"))?;
        }

        Ok(())
    }

    async fn roll_back(&self) -> RollbackStatus {
        let failed = |reason: String| RollbackStatus::Failed {
            backup_path: self.backup_path.clone(),
            reason,
        };

        if !self.backup_path.exists() {
            return failed("backup is missing".to_string());
        }

        // Anything at the executable path now is a new or partial binary.
        if self.executable_path.exists() {
            if let Err(e) = fs::remove_file(&self.executable_path).await {
                return failed(format!("could not remove incomplete executable: {e}"));
            }
        }

        match fs::rename(&self.backup_path, &self.executable_path).await {
            Ok(()) => RollbackStatus::Restored,
            Err(e) => failed(e.to_string()),
        }
    }

    /// Put the `.old` backup back over the executable.
    ///
    /// Retries a few times since the executable may still be locked by a
    /// process that is shutting down.
    pub async fn restore_backup(&self) -> Result<(), UpdateError> {
        if !self.backup_path.exists() {
            return Err(UpdateError::io(
                "find backup",
                &self.backup_path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no backup found"),
            ));
        }

        warn!("Restoring from backup at {}", self.backup_path.display());

        let mut attempts = 0;
        loop {
            match self.attempt_restore().await {
                Ok(()) => {
                    info!("Successfully restored from backup");
                    return Ok(());
                }
                Err(e) if attempts < RESTORE_MAX_ATTEMPTS - 1 => {
                    warn!("Restore attempt {} failed: {}. Retrying...", attempts + 1, e);
                    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                    attempts += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt_restore(&self) -> Result<(), UpdateError> {
        if self.executable_path.exists() {
            fs::remove_file(&self.executable_path)
                .await
                .map_err(|e| UpdateError::io("remove", &self.executable_path, e))?;
        }

        fs::rename(&self.backup_path, &self.executable_path)
            .await
            .map_err(|e| UpdateError::io("restore", &self.executable_path, e))
    }
}

/// Rename, falling back to copy-and-delete when source and destination are
/// on different filesystems.
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(rename_error) => {
            if !from.exists() {
                return Err(rename_error);
            }
            debug!("Rename failed ({rename_error}), copying instead");
            fs::copy(from, to).await?;
            if let Err(e) = fs::remove_file(from).await {
                warn!("Could not remove {} after copying: {e}", from.display());
            }
            Ok(())
        }
    }
}
