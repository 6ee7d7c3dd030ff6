//! Streaming artifact download with progress and cooperative cancellation.
//!
//! The body is streamed to `<artifact>.part` and renamed to the final artifact
//! name only once every byte is on disk. A failed or cancelled download
//! removes the partial file, so the final path either holds a complete
//! artifact or nothing at all.

use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::constants::{ARTIFACT_PREFIX, DOWNLOAD_BUFFER_SIZE, PARTIAL_SUFFIX, USER_AGENT};
use crate::core::UpdateError;

const OPERATION: &str = "downloading update";

/// One progress notification.
///
/// `percent` is `None` when the server did not announce a length. It never
/// decreases within one download and reaches `100` only after the artifact
/// is complete on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub percent: Option<u8>,
    pub bytes_received: u64,
    pub total_bytes: Option<u64>,
}

/// A fully downloaded artifact waiting to be installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedArtifact {
    pub local_path: PathBuf,
    pub version: String,
}

/// Cooperative cancellation signal shared between the coordinator and a
/// download worker.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// `floor(received / total * 100)`, or `None` when the total is unknown.
#[must_use]
pub fn percent_of(received: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let percent = u128::from(received.min(total)) * 100 / u128::from(total);
    Some(percent as u8)
}

/// Deterministic artifact file name for `version`.
#[must_use]
pub fn artifact_file_name(version: &str) -> String {
    let safe: String = version
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    format!("{ARTIFACT_PREFIX}_v{safe}_update{}", std::env::consts::EXE_SUFFIX)
}

fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

async fn remove_if_exists(path: &Path) -> Result<(), UpdateError> {
    match fs::remove_file(path).await {
        Ok(()) => {
            debug!("Removed stale file {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(UpdateError::io("remove", path, e)),
    }
}

/// Streams release artifacts to a local directory.
#[derive(Debug, Clone)]
pub struct ArtifactDownloader {
    client: reqwest::Client,
    target_dir: PathBuf,
}

impl ArtifactDownloader {
    pub fn new(target_dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self, UpdateError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| UpdateError::Network {
                operation: "building HTTP client".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            target_dir: target_dir.into(),
        })
    }

    /// Where the artifact for `version` ends up.
    pub fn artifact_path(&self, version: &str) -> PathBuf {
        self.target_dir.join(artifact_file_name(version))
    }

    /// Download `url` as the artifact for `version`.
    ///
    /// `on_progress` is called from the download task at chunk granularity.
    /// Returns [`UpdateError::Cancelled`] if `cancel` fires before the
    /// artifact is complete; no file is left behind in that case.
    pub async fn download<F>(
        &self,
        url: &str,
        version: &str,
        cancel: &CancelFlag,
        mut on_progress: F,
    ) -> Result<DownloadedArtifact, UpdateError>
    where
        F: FnMut(DownloadProgress),
    {
        let final_path = self.artifact_path(version);
        let partial = partial_path(&final_path);

        fs::create_dir_all(&self.target_dir)
            .await
            .map_err(|e| UpdateError::io("create", &self.target_dir, e))?;
        remove_if_exists(&final_path).await?;
        remove_if_exists(&partial).await?;

        info!("Downloading version {version} from {url}");
        let received = match self.stream_to(url, &partial, cancel, &mut on_progress).await {
            Ok(received) => received,
            Err(e) => {
                discard(&partial).await;
                return Err(e);
            }
        };

        if cancel.is_cancelled() {
            discard(&partial).await;
            return Err(UpdateError::Cancelled);
        }

        if let Err(e) = fs::rename(&partial, &final_path).await {
            discard(&partial).await;
            return Err(UpdateError::io("finalize", &final_path, e));
        }

        on_progress(DownloadProgress {
            percent: Some(100),
            bytes_received: received,
            total_bytes: Some(received),
        });
        info!("Downloaded {} bytes to {}", received, final_path.display());

        Ok(DownloadedArtifact {
            local_path: final_path,
            version: version.to_string(),
        })
    }

    async fn stream_to<F>(
        &self,
        url: &str,
        partial: &Path,
        cancel: &CancelFlag,
        on_progress: &mut F,
    ) -> Result<u64, UpdateError>
    where
        F: FnMut(DownloadProgress),
    {
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(UpdateError::Cancelled),
            response = self.client.get(url).send() => {
                response.map_err(|e| UpdateError::from_reqwest(OPERATION, e))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let total = response.content_length().filter(|len| *len > 0);
        let file = fs::File::create(partial)
            .await
            .map_err(|e| UpdateError::io("create", partial, e))?;
        let mut writer = BufWriter::with_capacity(DOWNLOAD_BUFFER_SIZE, file);
        let mut stream = response.bytes_stream();

        let mut received: u64 = 0;
        let mut last_percent = total.map(|_| 0u8);
        on_progress(DownloadProgress {
            percent: last_percent,
            bytes_received: 0,
            total_bytes: total,
        });

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(UpdateError::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|e| UpdateError::from_reqwest(OPERATION, e))?;

            writer
                .write_all(&chunk)
                .await
                .map_err(|e| UpdateError::io("write", partial, e))?;
            received += chunk.len() as u64;

            // 100 is reserved for the completed artifact.
            let percent = total.and_then(|total| percent_of(received, total)).map(|p| p.min(99));
            if total.is_none() || percent > last_percent {
                last_percent = percent.max(last_percent);
                on_progress(DownloadProgress {
                    percent: last_percent,
                    bytes_received: received,
                    total_bytes: total,
                });
            }
        }

        writer.flush().await.map_err(|e| UpdateError::io("flush", partial, e))?;
        writer
            .into_inner()
            .sync_all()
            .await
            .map_err(|e| UpdateError::io("sync", partial, e))?;

        if received == 0 {
            return Err(UpdateError::Network {
                operation: OPERATION.to_string(),
                reason: "server sent an empty artifact".to_string(),
            });
        }
        if let Some(total) = total {
            if received < total {
                return Err(UpdateError::Network {
                    operation: OPERATION.to_string(),
                    reason: format!("connection closed after {received} of {total} bytes"),
                });
            }
        }

        Ok(received)
    }
}

async fn discard(partial: &Path) {
    if let Err(e) = remove_if_exists(partial).await {
        warn!("Could not remove partial download: {e}");
    }
}
