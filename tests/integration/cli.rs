//! The `easylaw-updater` binary, driven through `assert_cmd`.

use assert_cmd::Command;
use easylaw_updater::test_utils::http::{Route, TestServer};
use easylaw_updater::upgrade::now_epoch_seconds;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

struct Install {
    temp_dir: TempDir,
    exe: PathBuf,
    state_file: PathBuf,
}

impl Install {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let exe = temp_dir.path().join("EasyLaw");
        fs::write(&exe, b"current build").unwrap();
        let state_file = temp_dir.path().join("updater_state.toml");
        Self {
            temp_dir,
            exe,
            state_file,
        }
    }

    fn backup(&self) -> PathBuf {
        self.temp_dir.path().join("EasyLaw.old")
    }

    /// Updater command isolated from any real configuration.
    fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("easylaw-updater").unwrap();
        cmd.env("EASYLAW_UPDATER_CONFIG", self.temp_dir.path().join("updater.toml"))
            .env("EASYLAW_NO_PROGRESS", "1")
            .env("NO_COLOR", "1")
            .env_remove("RUST_LOG")
            .arg("--executable")
            .arg(&self.exe)
            .arg("--state-file")
            .arg(&self.state_file);
        cmd
    }

    fn last_check(&self) -> f64 {
        let content = fs::read_to_string(&self.state_file).unwrap();
        let doc: toml::Table = toml::from_str(&content).unwrap();
        doc["update_settings"]["last_update_check_timestamp"].as_float().unwrap()
    }
}

#[test]
fn test_status_on_fresh_install() {
    let install = Install::new();

    install
        .command()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Current version:"))
        .stdout(predicate::str::contains("never"))
        .stdout(predicate::str::contains("not configured"));
}

#[test]
fn test_check_without_manifest_url_fails() {
    let install = Install::new();

    install
        .command()
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not configured"));

    assert_eq!(fs::read(&install.exe).unwrap(), b"current build");
}

#[test]
fn test_rollback_without_backup_fails() {
    let install = Install::new();

    install
        .command()
        .arg("rollback")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No backup found"));
}

#[test]
fn test_rollback_restores_backup() {
    let install = Install::new();
    fs::write(install.backup(), b"previous build").unwrap();

    install
        .command()
        .arg("rollback")
        .assert()
        .success()
        .stdout(predicate::str::contains("rolled back"));

    assert_eq!(fs::read(&install.exe).unwrap(), b"previous build");
    assert!(!install.backup().exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_check_reports_latest_version() {
    let manifest = r#"{"version": "1.0.0", "download_url": "http://127.0.0.1:1/EasyLaw.exe"}"#;
    let server = TestServer::start(vec![("/latest_version.json", Route::ok(manifest))])
        .await
        .unwrap();
    let install = Install::new();
    let mut cmd = install.command();
    cmd.arg("--manifest-url").arg(server.url("/latest_version.json")).arg("check");

    let assert = tokio::task::spawn_blocking(move || cmd.assert()).await.unwrap();
    assert.success().stdout(predicate::str::contains("latest version"));

    assert_eq!(server.request_count(), 1);
    assert!(install.last_check() > 0.0);
}

#[test]
fn test_startup_skips_when_not_due() {
    let install = Install::new();
    fs::write(
        &install.state_file,
        format!("[update_settings]\nlast_update_check_timestamp = {:.3}\n", now_epoch_seconds()),
    )
    .unwrap();

    install.command().arg("startup").assert().success().stdout(predicate::str::is_empty());
}

#[test]
fn test_startup_records_check_even_when_unconfigured() {
    let install = Install::new();

    install.command().arg("startup").assert().success();

    assert!(install.last_check() > 0.0);
}
