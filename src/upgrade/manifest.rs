//! Remote version manifest retrieval.
//!
//! The manifest is a small JSON document published next to the release
//! artifacts:
//!
//! ```json
//! {"version": "1.3.0", "download_url": "https://example.com/EasyLaw-1.3.0.exe"}
//! ```
//!
//! Unknown fields are ignored so the publisher can add release notes or
//! checksums without breaking older clients.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::constants::{PLACEHOLDER_TOKENS, USER_AGENT};
use crate::core::UpdateError;

const OPERATION: &str = "fetching update manifest";

/// Latest published version and where to download it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateManifest {
    pub version: String,
    pub download_url: String,
}

impl UpdateManifest {
    /// Parse and validate a manifest body.
    pub fn parse(body: &str) -> Result<Self, UpdateError> {
        let manifest: Self = serde_json::from_str(body).map_err(|e| UpdateError::MalformedManifest {
            reason: e.to_string(),
        })?;

        if manifest.version.trim().is_empty() {
            return Err(UpdateError::MalformedManifest {
                reason: "empty 'version'".to_string(),
            });
        }
        if manifest.download_url.trim().is_empty() {
            return Err(UpdateError::MalformedManifest {
                reason: "empty 'download_url'".to_string(),
            });
        }
        Ok(manifest)
    }
}

/// Whether `url` is unset or still the shipped template.
#[must_use]
pub fn is_placeholder_url(url: &str) -> bool {
    let url = url.trim();
    url.is_empty() || PLACEHOLDER_TOKENS.iter().any(|token| url.contains(token))
}

/// Performs one bounded GET of the version manifest.
#[derive(Debug, Clone)]
pub struct VersionManifestFetcher {
    client: reqwest::Client,
    url: String,
}

impl VersionManifestFetcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, UpdateError> {
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
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch and parse the manifest.
    ///
    /// An unconfigured URL fails with [`UpdateError::NotConfigured`] before
    /// any request is made.
    pub async fn fetch(&self) -> Result<UpdateManifest, UpdateError> {
        if is_placeholder_url(&self.url) {
            return Err(UpdateError::NotConfigured {
                url: self.url.clone(),
            });
        }

        debug!("Checking for updates at {}", self.url);
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| UpdateError::from_reqwest(OPERATION, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::HttpStatus {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| UpdateError::from_reqwest(OPERATION, e))?;
        let manifest = UpdateManifest::parse(&body)?;
        info!("Latest published version: {}", manifest.version);
        Ok(manifest)
    }
}
