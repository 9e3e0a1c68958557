//! Self-update from a GitHub release.
//!
//! `update <tag>` fetches the release for the tag, downloads the configured
//! asset next to the running executable and renames it into place. The
//! caller then shuts the process down so a supervisor restarts the new
//! binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, instrument};

use crate::config::UpdaterConfig;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("release request failed: {0}")]
    Http(String),

    #[error("no release tagged {0}")]
    UnknownTag(String),

    #[error("release {tag} has no asset named {asset}")]
    MissingAsset { tag: String, asset: String },

    #[error("failed to install update: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    name: String,
    browser_download_url: String,
}

pub struct SelfUpdater {
    client: reqwest::Client,
    api_url: String,
    repository: String,
    asset_name: String,
}

impl SelfUpdater {
    pub fn new(config: &UpdaterConfig) -> Result<Self, UpdateError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .user_agent(concat!("booker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpdateError::Http(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            repository: config.repository.clone(),
            asset_name: config.asset_name.clone(),
        })
    }

    /// Replace the running executable with the asset from `tag`.
    pub async fn update(&self, tag: &str) -> Result<PathBuf, UpdateError> {
        let target = std::env::current_exe()?;
        self.update_to(tag, &target).await?;
        Ok(target)
    }

    /// Install the asset from `tag` at `target`.
    #[instrument(skip(self, target), fields(repository = %self.repository))]
    pub async fn update_to(&self, tag: &str, target: &Path) -> Result<(), UpdateError> {
        let release = self.release(tag).await?;
        let asset = release
            .assets
            .iter()
            .find(|a| a.name == self.asset_name)
            .ok_or_else(|| UpdateError::MissingAsset {
                tag: release.tag_name.clone(),
                asset: self.asset_name.clone(),
            })?;

        info!(tag = %release.tag_name, asset = %asset.name, "Downloading release asset");
        let bytes = self
            .client
            .get(&asset.browser_download_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| UpdateError::Http(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| UpdateError::Http(e.to_string()))?;

        install(target, &bytes).await?;
        info!(tag = %release.tag_name, path = %target.display(), "Installed update");
        Ok(())
    }

    async fn release(&self, tag: &str) -> Result<Release, UpdateError> {
        let url = format!(
            "{}/repos/{}/releases/tags/{}",
            self.api_url, self.repository, tag
        );
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| UpdateError::Http(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(UpdateError::UnknownTag(tag.to_string()));
        }

        response
            .error_for_status()
            .map_err(|e| UpdateError::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| UpdateError::Http(e.to_string()))
    }
}

/// Write `bytes` beside `target` and rename over it.
async fn install(target: &Path, bytes: &[u8]) -> Result<(), UpdateError> {
    let staged = target.with_extension("update");
    tokio::fs::write(&staged, bytes).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&staged, std::fs::Permissions::from_mode(0o755)).await?;
    }

    tokio::fs::rename(&staged, target).await?;
    Ok(())
}
