// SPDX-License-Identifier: MIT
//! Remote release metadata APIs.
//!
//! Two GETs against the Costrict backend:
//! - `{base}/costrict/{platform}/{arch}/platform.json`: the per-platform
//!   manifest
//!   listing the newest and all published versions;
//! - `{base}{infoUrl}`: the per-version package manifest carrying the
//!   checksum used to verify a downloaded binary.

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::indexer::platform;
use crate::indexer::version::VersionInfo;

/// Per-platform release manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformManifest {
    pub package_name: String,
    pub os: String,
    pub arch: String,
    pub newest: VersionInfo,
    #[serde(default)]
    pub versions: Vec<VersionInfo>,
}

/// Per-version package manifest describing one binary artifact.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageInfo {
    pub checksum: String,
    #[serde(default = "default_checksum_algo")]
    pub checksum_algo: String,
    #[serde(default)]
    pub sign: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
}

fn default_checksum_algo() -> String {
    "sha256".to_string()
}

/// Typed client for the release metadata endpoints.
pub struct ReleaseApi {
    http: reqwest::Client,
    base_url: String,
}

impl ReleaseApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// Fetch the release manifest for the host platform.
    pub async fn fetch_platform_manifest(&self) -> Result<PlatformManifest> {
        let url = format!(
            "{}/costrict/{}/{}/platform.json",
            self.base_url,
            platform::platform()?,
            platform::arch()?
        );
        debug!(url = %url, "fetching platform manifest");
        let manifest = self.get_json::<PlatformManifest>(&url).await?;
        Ok(manifest)
    }

    /// Fetch the package manifest for one published version.
    pub async fn fetch_package_info(&self, info_url: &str) -> Result<PackageInfo> {
        let url = format!("{}{}", self.base_url, info_url);
        debug!(url = %url, "fetching package info");
        self.get_json::<PackageInfo>(&url).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::RemoteStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.json::<T>().await?)
    }
}
