use anyhow::{Context, Result, bail};
use colored::Colorize;

use crate::upgrade::{BinaryReplacer, UpdateConfig};

/// Put `<exe>.old` back over the executable.
pub async fn execute(config: UpdateConfig) -> Result<()> {
    let replacer = BinaryReplacer::new(config.resolve_executable_path()?);

    if !replacer.backup_exists() {
        bail!(
            "No backup found at {}. Cannot rollback.",
            replacer.backup_path().display()
        );
    }

    println!("{}", "Rolling back to previous version...".yellow());
    replacer.restore_backup().await.context("Failed to restore from backup")?;
    println!("{}", "Successfully rolled back to previous version".green());

    Ok(())
}
