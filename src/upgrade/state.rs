//! Persisted update bookkeeping.
//!
//! The store is a small TOML document next to the application:
//!
//! ```toml
//! [update_settings]
//! last_update_check_timestamp = 1718000000.5
//! ```
//!
//! The store is self-healing. A missing file, a missing table or key, a value
//! of the wrong type, or a document that no longer parses all read back as
//! "never checked" (`0.0`), and that default is written back. Other sections
//! of the file are kept unless the document itself no longer parses.
//! Storage failures are logged and never propagated: the updater must keep
//! working even when its bookkeeping file is corrupt.

use anyhow::{Context, Result, anyhow};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;
use toml_edit::DocumentMut;
use tracing::{debug, warn};

use crate::constants::{NEVER_CHECKED, STATE_KEY_LAST_CHECK, STATE_SECTION};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Current wall-clock time as fractional Unix epoch seconds.
#[must_use]
pub fn now_epoch_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Whether an automatic check is due.
///
/// A check is due when none ever ran (`last_check == 0.0`) or when more than
/// `interval_hours` have elapsed since `last_check`.
#[must_use]
pub fn is_check_due(last_check: f64, now: f64, interval_hours: f64) -> bool {
    if last_check == NEVER_CHECKED {
        return true;
    }
    now - last_check > interval_hours * SECONDS_PER_HOUR
}

/// Durable record of when the last update check happened.
///
/// Owned by the update coordinator, which is the only reader and writer.
#[derive(Debug, Clone)]
pub struct UpdateStateStore {
    path: PathBuf,
}

impl UpdateStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored last-check timestamp, or `0.0` when absent or unreadable.
    ///
    /// Repairs the store as a side effect when it is missing or damaged.
    pub async fn get_last_check(&self) -> f64 {
        match self.read_last_check().await {
            Ok(Some(timestamp)) => timestamp,
            Ok(None) => {
                debug!("No last-check timestamp in {}, writing default", self.path.display());
                self.reset().await;
                NEVER_CHECKED
            }
            Err(e) => {
                warn!(
                    "Update state at {} is unreadable ({e:#}), resetting to defaults",
                    self.path.display()
                );
                self.reset().await;
                NEVER_CHECKED
            }
        }
    }

    /// Record a check at `timestamp`, or now when `None`.
    pub async fn set_last_check(&self, timestamp: Option<f64>) {
        let timestamp = timestamp.unwrap_or_else(now_epoch_seconds);
        if let Err(e) = self.write_last_check(timestamp).await {
            warn!("Failed to persist last update check to {}: {e:#}", self.path.display());
        } else {
            debug!("Recorded update check at {timestamp}");
        }
    }

    /// Put the "never checked" default back. Other sections of the file are
    /// kept; only a document that no longer parses is replaced wholesale.
    pub async fn reset(&self) {
        if let Err(e) = self.write_last_check(NEVER_CHECKED).await {
            warn!("Failed to recreate update state at {}: {e:#}", self.path.display());
        }
    }

    async fn read_last_check(&self) -> Result<Option<f64>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let document: DocumentMut = content.parse().context("Failed to parse update state")?;

        let Some(item) = document.get(STATE_SECTION).and_then(|table| table.get(STATE_KEY_LAST_CHECK))
        else {
            return Ok(None);
        };

        item.as_float()
            .or_else(|| item.as_integer().map(|value| value as f64))
            .filter(|value| value.is_finite())
            .map(Some)
            .ok_or_else(|| anyhow!("'{STATE_KEY_LAST_CHECK}' is not a number"))
    }

    async fn write_last_check(&self, timestamp: f64) -> Result<()> {
        // Keep whatever else lives in the file; start fresh if it is unreadable.
        let mut document = match fs::read_to_string(&self.path).await {
            Ok(content) => content.parse::<DocumentMut>().unwrap_or_default(),
            Err(_) => DocumentMut::new(),
        };
        set_timestamp(&mut document, timestamp);
        self.write_document(&document).await
    }

    async fn write_document(&self, document: &DocumentMut) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;

        let content = document.to_string();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut temp = tempfile::NamedTempFile::new_in(&parent)
                .context("Failed to create temporary state file")?;
            temp.write_all(content.as_bytes()).context("Failed to write update state")?;
            temp.persist(&path)
                .map_err(|e| e.error)
                .with_context(|| format!("Failed to replace {}", path.display()))?;
            Ok(())
        })
        .await
        .context("State writer task failed")?
    }
}

fn set_timestamp(document: &mut DocumentMut, timestamp: f64) {
    let has_table = document.get(STATE_SECTION).is_some_and(toml_edit::Item::is_table);
    if !has_table {
        document.insert(STATE_SECTION, toml_edit::table());
    }
    document[STATE_SECTION][STATE_KEY_LAST_CHECK] = toml_edit::value(timestamp);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> UpdateStateStore {
        UpdateStateStore::new(dir.path().join("updater_state.toml"))
    }

    #[tokio::test]
    async fn test_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);

        store.set_last_check(Some(12345.0)).await;
        assert_eq!(store.get_last_check().await, 12345.0);

        store.set_last_check(Some(1718000000.123456)).await;
        assert_eq!(store.get_last_check().await, 1718000000.123456);
    }

    #[tokio::test]
    async fn test_missing_file_is_recreated() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);

        assert_eq!(store.get_last_check().await, 0.0);
        assert!(store.path().exists());
        let content = std::fs::read_to_string(store.path()).unwrap();
        assert!(content.contains("[update_settings]"));
        assert!(content.contains("last_update_check_timestamp"));
    }

    #[tokio::test]
    async fn test_corrupt_file_resets() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);

        std::fs::write(store.path(), "this is [not toml").unwrap();
        assert_eq!(store.get_last_check().await, 0.0);

        // The store was repaired, so the next write sticks.
        store.set_last_check(Some(42.0)).await;
        assert_eq!(store.get_last_check().await, 42.0);
    }

    #[tokio::test]
    async fn test_wrong_type_resets() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);

        std::fs::write(
            store.path(),
            "[ui]\ntheme = \"dark\"\n\n[update_settings]\nlast_update_check_timestamp = \"yesterday\"\n",
        )
        .unwrap();
        assert_eq!(store.get_last_check().await, 0.0);

        let content = std::fs::read_to_string(store.path()).unwrap();
        assert!(content.contains("theme = \"dark\""));
        assert_eq!(store.get_last_check().await, 0.0);
    }

    #[tokio::test]
    async fn test_missing_section_and_key() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);

        std::fs::write(store.path(), "[other]\nvalue = 1\n").unwrap();
        assert_eq!(store.get_last_check().await, 0.0);
        let content = std::fs::read_to_string(store.path()).unwrap();
        assert!(content.contains("[other]"));
        assert!(content.contains("value = 1"));
        assert!(content.contains("last_update_check_timestamp = 0.0"));

        std::fs::write(store.path(), "[update_settings]\n").unwrap();
        assert_eq!(store.get_last_check().await, 0.0);
    }

    #[tokio::test]
    async fn test_integer_timestamp_accepted() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);

        std::fs::write(store.path(), "[update_settings]\nlast_update_check_timestamp = 1700000000\n")
            .unwrap();
        assert_eq!(store.get_last_check().await, 1_700_000_000.0);
    }

    #[tokio::test]
    async fn test_write_preserves_other_settings() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);

        std::fs::write(store.path(), "# local settings\n[ui]\ntheme = \"dark\"\n").unwrap();
        store.set_last_check(Some(99.5)).await;

        let content = std::fs::read_to_string(store.path()).unwrap();
        assert!(content.contains("theme = \"dark\""));
        assert!(content.contains("# local settings"));
        assert_eq!(store.get_last_check().await, 99.5);
    }

    #[tokio::test]
    async fn test_creates_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let store = UpdateStateStore::new(temp_dir.path().join("a").join("b").join("state.toml"));

        store.set_last_check(Some(7.0)).await;
        assert_eq!(store.get_last_check().await, 7.0);
    }

    #[tokio::test]
    async fn test_default_timestamp_is_now() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);

        let before = now_epoch_seconds();
        store.set_last_check(None).await;
        let stored = store.get_last_check().await;
        assert!(stored >= before);
        assert!(stored <= now_epoch_seconds());
    }

    #[test]
    fn test_never_checked_is_always_due() {
        for interval in [0.0, 1.0, 24.0, 24.0 * 365.0] {
            assert!(is_check_due(0.0, now_epoch_seconds(), interval));
            assert!(is_check_due(0.0, 0.0, interval));
        }
    }

    #[test]
    fn test_due_boundary() {
        let now = 1_700_000_000.0;
        let day = 24.0 * 3600.0;

        assert!(!is_check_due(now - 60.0, now, 24.0));
        assert!(!is_check_due(now - day, now, 24.0));
        assert!(is_check_due(now - day - 1.0, now, 24.0));
        assert!(is_check_due(now - 7200.0, now, 1.0));
        // A timestamp from the future never makes a check due.
        assert!(!is_check_due(now + 3600.0, now, 24.0));
    }
}
