//! Orchestrator scenarios: check, consent, download, replace, restart.

use easylaw_updater::constants::PLACEHOLDER_MANIFEST_URL;
use easylaw_updater::core::UpdateError;
use easylaw_updater::test_utils::{RecordingRestarter, init_test_logging};
use easylaw_updater::test_utils::http::{Route, TestServer};
use easylaw_updater::upgrade::{
    CheckKind, UpdateConfig, UpdateEvent, UpdateHandle, UpdateOrchestrator, UpdateOutcome,
    UpdateState, now_epoch_seconds,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

struct Sandbox {
    _temp_dir: TempDir,
    exe: PathBuf,
    downloads: PathBuf,
    config: UpdateConfig,
}

impl Sandbox {
    fn new(manifest_url: &str) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let app_dir = temp_dir.path().join("app");
        std::fs::create_dir_all(&app_dir).unwrap();
        let exe = app_dir.join("EasyLaw");
        std::fs::write(&exe, b"version 1.2.0").unwrap();
        let downloads = temp_dir.path().join("downloads");

        let config = UpdateConfig::new()
            .with_manifest_url(manifest_url)
            .with_current_version("1.2.0")
            .with_executable_path(&exe)
            .with_download_dir(&downloads)
            .with_state_file(app_dir.join("updater_state.toml"));

        Self {
            _temp_dir: temp_dir,
            exe,
            downloads,
            config,
        }
    }

    fn backup(&self) -> PathBuf {
        let mut backup = self.exe.as_os_str().to_owned();
        backup.push(".old");
        PathBuf::from(backup)
    }

    fn spawn(
        &self,
        restarter: Arc<RecordingRestarter>,
    ) -> (UpdateHandle, UnboundedReceiver<UpdateEvent>) {
        UpdateOrchestrator::new(self.config.clone()).unwrap().with_restarter(restarter).spawn()
    }

    fn downloads_empty(&self) -> bool {
        std::fs::read_dir(&self.downloads).map_or(true, |mut entries| entries.next().is_none())
    }
}

async fn next_event(events: &mut UnboundedReceiver<UpdateEvent>) -> UpdateEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for an update event")
        .expect("update event stream closed")
}

/// Collect events up to and including the first one matching `done`.
async fn events_until(
    events: &mut UnboundedReceiver<UpdateEvent>,
    done: impl Fn(&UpdateEvent) -> bool,
) -> Vec<UpdateEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let finished = done(&event);
        seen.push(event);
        if finished {
            return seen;
        }
    }
}

fn is_check_finished(event: &UpdateEvent) -> bool {
    matches!(event, UpdateEvent::CheckFinished { .. })
}

fn manifest_json(version: &str, download_url: &str) -> String {
    format!(r#"{{"version": "{version}", "download_url": "{download_url}", "notes": "bug fixes"}}"#)
}

/// A manifest server pointing at an artifact server.
struct Release {
    manifest: TestServer,
    _artifact: TestServer,
}

impl Release {
    async fn start(version: &str, artifact: Route) -> Self {
        let artifact_server = TestServer::start(vec![("/EasyLaw.bin", artifact)]).await.unwrap();
        let manifest = manifest_json(version, &artifact_server.url("/EasyLaw.bin"));
        let manifest_server = TestServer::start(vec![("/latest_version.json", Route::ok(manifest))])
            .await
            .unwrap();

        Self {
            manifest: manifest_server,
            _artifact: artifact_server,
        }
    }

    fn manifest_url(&self) -> String {
        self.manifest.url("/latest_version.json")
    }
}

fn new_binary() -> Vec<u8> {
    (0..48 * 1024).map(|i| (i % 241) as u8).collect()
}

#[tokio::test]
async fn test_update_end_to_end() {
    init_test_logging(None);
    let release = Release::start("1.3.0", Route::ok(new_binary()).chunked(4096)).await;
    let sandbox = Sandbox::new(&release.manifest_url());
    let restarter = Arc::new(RecordingRestarter::default());
    let (handle, mut events) = sandbox.spawn(restarter.clone());

    let before = now_epoch_seconds();
    assert!(handle.run_check(CheckKind::Manual).await.unwrap());
    let check_events = events_until(&mut events, is_check_finished).await;

    assert!(matches!(check_events[0], UpdateEvent::CheckStarted(CheckKind::Manual)));
    assert!(check_events.iter().any(|e| matches!(
        e,
        UpdateEvent::UpdateFound { version, current } if version == "1.3.0" && current == "1.2.0"
    )));
    let snapshot = handle.snapshot().await.unwrap();
    match &snapshot.state {
        UpdateState::UpdateAvailable(manifest) => assert_eq!(manifest.version, "1.3.0"),
        other => panic!("expected UpdateAvailable, got {other:?}"),
    }
    assert!(snapshot.last_check >= before.floor());
    assert!(snapshot.last_check <= now_epoch_seconds());

    handle.start_download().await.unwrap();
    let flow = events_until(&mut events, |e| matches!(e, UpdateEvent::RestartImminent(_))).await;

    let percents: Vec<u8> = flow
        .iter()
        .filter_map(|e| match e {
            UpdateEvent::Progress(progress) => progress.percent,
            _ => None,
        })
        .collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {percents:?}");
    assert_eq!(percents.last(), Some(&100));
    assert!(flow.iter().any(|e| matches!(e, UpdateEvent::DownloadFinished(a) if a.version == "1.3.0")));
    assert!(flow.iter().any(|e| matches!(e, UpdateEvent::ReplaceSucceeded(p) if *p == sandbox.exe)));

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(
        snapshot.state,
        UpdateState::Restarting {
            executable: sandbox.exe.clone()
        }
    );
    assert!(matches!(snapshot.last_outcome, Some(UpdateOutcome::ReplaceSucceeded(_))));
    assert_eq!(restarter.launched(), vec![sandbox.exe.clone()]);
    assert_eq!(std::fs::read(&sandbox.exe).unwrap(), new_binary());
    assert_eq!(std::fs::read(sandbox.backup()).unwrap(), b"version 1.2.0");
    assert!(sandbox.downloads_empty());

    let state = std::fs::read_to_string(sandbox.config.resolve_state_file()).unwrap();
    assert!(state.contains("[update_settings]"));
    assert!(state.contains("last_update_check_timestamp"));
}

#[tokio::test]
async fn test_placeholder_url_makes_no_request() {
    let server = TestServer::start(vec![(
        "/YOUR_REPOSITORY/latest_version.json",
        Route::ok(manifest_json("9.9.9", "http://127.0.0.1:1/never")),
    )])
    .await
    .unwrap();
    let sandbox = Sandbox::new(&server.url("/YOUR_REPOSITORY/latest_version.json"));
    let (handle, mut events) = sandbox.spawn(Arc::new(RecordingRestarter::default()));

    handle.run_check(CheckKind::Manual).await.unwrap();
    let check_events = events_until(&mut events, is_check_finished).await;

    match check_events.last() {
        Some(UpdateEvent::CheckFinished {
            kind: CheckKind::Manual,
            outcome,
        }) => assert!(matches!(outcome.error(), Some(UpdateError::NotConfigured { .. }))),
        other => panic!("unexpected final event: {other:?}"),
    }
    assert_eq!(server.request_count(), 0);
    assert_eq!(handle.snapshot().await.unwrap().state, UpdateState::Idle);
}

#[tokio::test]
async fn test_default_placeholder_is_not_configured() {
    let sandbox = Sandbox::new(PLACEHOLDER_MANIFEST_URL);
    let (handle, mut events) = sandbox.spawn(Arc::new(RecordingRestarter::default()));

    handle.run_check(CheckKind::Manual).await.unwrap();
    let check_events = events_until(&mut events, is_check_finished).await;
    let Some(UpdateEvent::CheckFinished {
        outcome,
        ..
    }) = check_events.last()
    else {
        panic!("check did not finish");
    };
    let error = outcome.error().unwrap();
    assert!(matches!(error, UpdateError::NotConfigured { .. }));
    assert!(!error.is_retryable());
}

#[tokio::test]
async fn test_automatic_check_records_time_at_launch() {
    let server =
        TestServer::start(vec![("/latest_version.json", Route::ok("{}").stall_after(0))])
            .await
            .unwrap();
    let sandbox = Sandbox::new(&server.url("/latest_version.json"));
    let (handle, _events) = sandbox.spawn(Arc::new(RecordingRestarter::default()));

    assert!(handle.is_check_due().await.unwrap());
    assert!(handle.check_if_due().await.unwrap());

    // The request is still hanging, but the check already counts.
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, UpdateState::Checking(CheckKind::Automatic));
    assert!(snapshot.last_check > 0.0);
    assert!(!handle.is_check_due().await.unwrap());

    // Single flight: a second automatic check is a no-op, a manual one is refused.
    assert!(!handle.run_check(CheckKind::Automatic).await.unwrap());
    assert!(matches!(
        handle.run_check(CheckKind::Manual).await,
        Err(UpdateError::AlreadyInProgress { .. })
    ));
}

#[tokio::test]
async fn test_manual_check_records_time_on_completion() {
    let server =
        TestServer::start(vec![("/latest_version.json", Route::ok("{}").stall_after(0))])
            .await
            .unwrap();
    let mut sandbox = Sandbox::new(&server.url("/latest_version.json"));
    sandbox.config.check_timeout_secs = 1;
    let (handle, mut events) = sandbox.spawn(Arc::new(RecordingRestarter::default()));

    handle.run_check(CheckKind::Manual).await.unwrap();
    assert_eq!(handle.snapshot().await.unwrap().last_check, 0.0);
    assert!(matches!(
        handle.run_check(CheckKind::Manual).await,
        Err(UpdateError::AlreadyInProgress { .. })
    ));

    let check_events = events_until(&mut events, is_check_finished).await;
    let Some(UpdateEvent::CheckFinished {
        outcome,
        ..
    }) = check_events.last()
    else {
        panic!("check did not finish");
    };
    assert!(outcome.error().is_some_and(UpdateError::is_retryable));

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, UpdateState::Idle);
    assert!(snapshot.last_check > 0.0);
}

#[tokio::test]
async fn test_automatic_check_without_update_is_silent() {
    let server = TestServer::start(vec![(
        "/latest_version.json",
        Route::ok(manifest_json("1.2.0", "http://127.0.0.1:1/never")),
    )])
    .await
    .unwrap();
    let sandbox = Sandbox::new(&server.url("/latest_version.json"));
    let (handle, mut events) = sandbox.spawn(Arc::new(RecordingRestarter::default()));

    handle.run_check(CheckKind::Automatic).await.unwrap();
    let check_events = events_until(&mut events, is_check_finished).await;

    assert!(!check_events.iter().any(|e| matches!(e, UpdateEvent::UpToDate { .. })));
    assert!(!check_events.iter().any(|e| matches!(e, UpdateEvent::UpdateFound { .. })));
}

#[tokio::test]
async fn test_cancel_download_leaves_nothing_behind() {
    let release = Release::start("1.3.0", Route::ok(new_binary()).stall_after(16 * 1024)).await;
    let sandbox = Sandbox::new(&release.manifest_url());
    let (handle, mut events) = sandbox.spawn(Arc::new(RecordingRestarter::default()));

    handle.run_check(CheckKind::Manual).await.unwrap();
    events_until(&mut events, is_check_finished).await;
    handle.start_download().await.unwrap();
    assert!(matches!(
        handle.start_download().await,
        Err(UpdateError::AlreadyInProgress { .. })
    ));

    let progress = events_until(&mut events, |e| {
        matches!(e, UpdateEvent::Progress(p) if p.bytes_received > 0)
    })
    .await;
    assert!(matches!(progress[0], UpdateEvent::DownloadStarted { .. }));

    assert!(handle.cancel_download().await.unwrap());

    let after = events_until(&mut events, |e| matches!(e, UpdateEvent::DownloadCancelled)).await;
    assert!(!after.iter().any(|e| matches!(e, UpdateEvent::Progress(p) if p.percent == Some(100))));
    assert!(sandbox.downloads_empty());
    assert_eq!(handle.snapshot().await.unwrap().state, UpdateState::Idle);
    assert_eq!(std::fs::read(&sandbox.exe).unwrap(), b"version 1.2.0");
    assert!(!handle.cancel_download().await.unwrap());
}

#[tokio::test]
async fn test_decline_returns_to_idle() {
    let release = Release::start("1.3.0", Route::ok(new_binary())).await;
    let sandbox = Sandbox::new(&release.manifest_url());
    let (handle, mut events) = sandbox.spawn(Arc::new(RecordingRestarter::default()));

    handle.run_check(CheckKind::Automatic).await.unwrap();
    let check_events = events_until(&mut events, is_check_finished).await;
    assert!(check_events.iter().any(|e| matches!(e, UpdateEvent::UpdateFound { .. })));

    assert!(handle.decline_update().await.unwrap());
    assert_eq!(handle.snapshot().await.unwrap().state, UpdateState::Idle);
    assert!(matches!(handle.start_download().await, Err(UpdateError::NothingToDownload)));
}

#[tokio::test]
async fn test_failed_download_keeps_installation() {
    let release = Release::start("1.3.0", Route::status(404)).await;
    let sandbox = Sandbox::new(&release.manifest_url());
    let restarter = Arc::new(RecordingRestarter::default());
    let (handle, mut events) = sandbox.spawn(restarter.clone());

    handle.run_check(CheckKind::Manual).await.unwrap();
    events_until(&mut events, is_check_finished).await;
    handle.start_download().await.unwrap();

    let flow = events_until(&mut events, |e| matches!(e, UpdateEvent::DownloadFailed(_))).await;
    let Some(UpdateEvent::DownloadFailed(error)) = flow.last() else {
        panic!("download did not fail");
    };
    assert!(matches!(**error, UpdateError::HttpStatus { status: 404, .. }));

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, UpdateState::Idle);
    assert!(matches!(snapshot.last_outcome, Some(UpdateOutcome::DownloadFailed(_))));
    assert_eq!(std::fs::read(&sandbox.exe).unwrap(), b"version 1.2.0");
    assert!(!sandbox.backup().exists());
    assert!(restarter.launched().is_empty());
    assert!(sandbox.downloads_empty());
}

#[tokio::test]
async fn test_empty_artifact_is_not_installed() {
    let release = Release::start("1.3.0", Route::ok(Vec::new())).await;
    let sandbox = Sandbox::new(&release.manifest_url());
    let restarter = Arc::new(RecordingRestarter::default());
    let (handle, mut events) = sandbox.spawn(restarter.clone());

    handle.run_check(CheckKind::Manual).await.unwrap();
    events_until(&mut events, is_check_finished).await;
    handle.start_download().await.unwrap();

    let flow = events_until(&mut events, |e| matches!(e, UpdateEvent::DownloadFailed(_))).await;
    assert!(!flow.iter().any(|e| matches!(e, UpdateEvent::ReplaceSucceeded(_))));

    assert_eq!(handle.snapshot().await.unwrap().state, UpdateState::Idle);
    assert_eq!(std::fs::read(&sandbox.exe).unwrap(), b"version 1.2.0");
    assert!(!sandbox.backup().exists());
    assert!(restarter.launched().is_empty());
    assert!(sandbox.downloads_empty());
}

#[tokio::test]
async fn test_restart_failure_keeps_new_binary() {
    let release = Release::start("1.3.0", Route::ok(new_binary())).await;
    let sandbox = Sandbox::new(&release.manifest_url());
    let (handle, mut events) = sandbox.spawn(Arc::new(RecordingRestarter::failing()));

    handle.run_check(CheckKind::Manual).await.unwrap();
    events_until(&mut events, is_check_finished).await;
    handle.start_download().await.unwrap();

    let flow = events_until(&mut events, |e| matches!(e, UpdateEvent::RestartFailed(_))).await;
    let Some(UpdateEvent::RestartFailed(error)) = flow.last() else {
        panic!("restart did not fail");
    };
    assert!(error.requires_user_action());
    assert!(flow.iter().any(|e| matches!(e, UpdateEvent::RestartImminent(_))));

    assert_eq!(handle.snapshot().await.unwrap().state, UpdateState::Idle);
    assert_eq!(std::fs::read(&sandbox.exe).unwrap(), new_binary());
}
