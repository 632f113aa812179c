// SPDX-License-Identifier: MIT
//! Verified binary download.
//!
//! Streams the artifact to disk with a progress callback, retries the whole
//! download with exponential backoff, and verifies the manifest checksum
//! before anything else is allowed to touch the file. A binary that fails
//! verification is deleted, never executed.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::indexer::api::PackageInfo;
use crate::indexer::version::VersionInfo;
use crate::retry::RetryPolicy;

/// Progress callback: `(downloaded_bytes, total_bytes, percent)`.
/// Only invoked when the response carries a Content-Length.
pub type ProgressFn = dyn Fn(u64, u64, f64) + Send + Sync;

const DOWNLOAD_ATTEMPTS: u32 = 3;

pub struct SecureFileDownloader {
    http: reqwest::Client,
    base_url: String,
    cancel: CancellationToken,
}

impl SecureFileDownloader {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        // No overall timeout: large binaries on slow links legitimately take
        // minutes. Connect timeout still bounds a dead remote.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            cancel: CancellationToken::new(),
        })
    }

    /// Abort the in-flight download, if any.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Download `version.app_url` to `target`, verify it against `package`,
    /// and mark it executable. Retries the whole transfer up to 3 times with
    /// exponential backoff, deleting any partial file between attempts.
    pub async fn download(
        &self,
        target: &Path,
        version: &VersionInfo,
        package: &PackageInfo,
        on_progress: Option<&ProgressFn>,
    ) -> Result<PathBuf> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let url = format!("{}{}", self.base_url, version.app_url);
        let policy = RetryPolicy::exponential(DOWNLOAD_ATTEMPTS, Duration::from_millis(1000));

        let url_ref = url.as_str();
        crate::retry::retry_with_backoff(&policy, || async move {
            match self.fetch_to_file(url_ref, target, on_progress).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    let _ = tokio::fs::remove_file(target).await;
                    // Cancellation must not burn the remaining attempts.
                    if e.is_cancelled() {
                        return Ok(());
                    }
                    Err(e)
                }
            }
        })
        .await?;

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        verify_and_finalize(target, package)?;
        info!(
            version = %version.version_id,
            path = %target.display(),
            "indexer binary downloaded and verified"
        );
        Ok(target.to_path_buf())
    }

    async fn fetch_to_file(
        &self,
        url: &str,
        target: &Path,
        on_progress: Option<&ProgressFn>,
    ) -> Result<()> {
        debug!(url = %url, "starting download attempt");

        let send = self.http.get(url).send();
        let mut response = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            resp = send => resp?,
        };

        if !response.status().is_success() {
            return Err(Error::RemoteStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let total = response.content_length().unwrap_or(0);
        let mut downloaded: u64 = 0;
        let mut file = tokio::fs::File::create(target).await?;

        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                chunk = response.chunk() => chunk?,
            };
            let Some(chunk) = chunk else { break };

            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            if total > 0 {
                if let Some(progress) = on_progress {
                    progress(downloaded, total, downloaded as f64 / total as f64 * 100.0);
                }
            }
        }
        file.flush().await?;
        Ok(())
    }
}

/// Verify the file's checksum against the package manifest and, on success,
/// set the executable bit (non-Windows). On mismatch the file is deleted and
/// [`Error::ChecksumMismatch`] is returned; the caller must never execute an
/// unverified binary.
pub fn verify_and_finalize(path: &Path, package: &PackageInfo) -> Result<()> {
    let actual = compute_checksum(path, &package.checksum_algo)?;

    // Digests compare case-insensitively: manifests in the wild carry both.
    if !actual.eq_ignore_ascii_case(&package.checksum) {
        warn!(
            path = %path.display(),
            expected = %package.checksum,
            actual = %actual,
            "checksum verification failed, deleting artifact"
        );
        let _ = std::fs::remove_file(path);
        return Err(Error::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: package.checksum.clone(),
            actual,
        });
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms)?;
    }

    Ok(())
}

/// Hash the full file contents with the manifest's declared algorithm.
fn compute_checksum(path: &Path, algo: &str) -> Result<String> {
    if !algo.eq_ignore_ascii_case("sha256") {
        return Err(Error::UnsupportedChecksumAlgo(algo.to_string()));
    }

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
