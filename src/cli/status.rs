use anyhow::Result;
use colored::Colorize;

use crate::constants::NEVER_CHECKED;
use crate::upgrade::manifest::is_placeholder_url;
use crate::upgrade::{BinaryReplacer, UpdateConfig, UpdateOrchestrator};

/// Local time of an epoch timestamp, or "never" for the sentinel.
fn format_last_check(timestamp: f64) -> String {
    if timestamp == NEVER_CHECKED {
        return "never".to_string();
    }
    let secs = timestamp.trunc() as i64;
    let nanos = (timestamp.fract() * 1e9) as u32;
    chrono::DateTime::from_timestamp(secs, nanos).map_or_else(
        || format!("{timestamp} (invalid)"),
        |time| time.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

pub async fn execute(config: UpdateConfig) -> Result<()> {
    let replacer = BinaryReplacer::new(config.resolve_executable_path()?);
    let manifest_url = config.manifest_url.clone();
    let (handle, _events) = UpdateOrchestrator::new(config)?.spawn();

    let snapshot = handle.snapshot().await?;
    let due = handle.is_check_due().await?;

    println!("{} {}", "Current version:".bold(), snapshot.current_version);
    println!("{} {}", "Executable:".bold(), replacer.executable_path().display());
    if is_placeholder_url(&manifest_url) {
        println!("{} {}", "Manifest URL:".bold(), "not configured".yellow());
    } else {
        println!("{} {manifest_url}", "Manifest URL:".bold());
    }
    println!("{} {}", "Last check:".bold(), format_last_check(snapshot.last_check));
    println!("{} {}", "Check due:".bold(), if due { "yes" } else { "no" });
    if replacer.backup_exists() {
        println!("{} {}", "Backup:".bold(), replacer.backup_path().display());
    } else {
        println!("{} none", "Backup:".bold());
    }

    Ok(())
}
