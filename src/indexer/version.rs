// SPDX-License-Identifier: MIT
//! Version metadata and the local `version.json` record.
//!
//! The remote publishes versions as a numeric (major, minor, micro) triple,
//! so comparison is a derived lexicographic `Ord` over the whole triple,
//! never a field-by-field check that could contradict a higher field.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

pub const VERSION_FILE: &str = "version.json";

/// Numeric version triple. Derived `Ord` gives lexicographic comparison.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct VersionId {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
}

impl VersionId {
    pub fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            major,
            minor,
            micro,
        }
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
    }
}

/// True when `remote` supersedes `local`; a missing local install always
/// forces an update.
pub fn should_update(local: Option<VersionId>, remote: VersionId) -> bool {
    match local {
        Some(l) => remote > l,
        None => true,
    }
}

/// Install progress recorded in `version.json` while a download runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallStatus {
    Downloading,
    Downloaded,
    Failed,
}

/// One published version of the indexer binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub version_id: VersionId,
    /// Relative URL of the binary artifact.
    pub app_url: String,
    /// Relative URL of the per-version package manifest.
    pub info_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<InstallStatus>,
    /// RFC-3339 timestamp of the last local status transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl VersionInfo {
    /// Copy with the given status and a fresh `updated_at` stamp.
    pub fn with_status(&self, status: InstallStatus) -> Self {
        Self {
            status: Some(status),
            updated_at: Some(chrono::Utc::now().to_rfc3339()),
            ..self.clone()
        }
    }
}

pub fn version_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join(VERSION_FILE)
}

/// Read the locally persisted version record.
///
/// A missing or corrupt file reads as `None`; the manager treats that as
/// "no install" and performs a first install.
pub fn read_version_file(data_dir: &Path) -> Option<VersionInfo> {
    let path = version_file_path(data_dir);
    let content = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&content) {
        Ok(info) => Some(info),
        Err(e) => {
            warn!(path = %path.display(), "ignoring corrupt version file: {e}");
            None
        }
    }
}

pub fn write_version_file(data_dir: &Path, info: &VersionInfo) -> Result<()> {
    std::fs::create_dir_all(data_dir)?;
    let content = serde_json::to_string_pretty(info)?;
    std::fs::write(version_file_path(data_dir), content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn comparison_is_lexicographic_over_the_triple() {
        let local = VersionId::new(1, 1, 9);
        let remote = VersionId::new(1, 2, 0);
        // Higher minor wins even though micro is lower.
        assert!(should_update(Some(local), remote));

        // Equal versions never update.
        assert!(!should_update(Some(remote), remote));

        // A micro-only bump still updates.
        assert!(should_update(
            Some(VersionId::new(1, 2, 0)),
            VersionId::new(1, 2, 1)
        ));

        // A decided higher field is never overridden by lower ones.
        assert!(!should_update(
            Some(VersionId::new(2, 0, 0)),
            VersionId::new(1, 9, 9)
        ));
    }

    #[test]
    fn missing_local_forces_update() {
        assert!(should_update(None, VersionId::new(0, 0, 1)));
    }

    #[test]
    fn version_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let info = VersionInfo {
            version_id: VersionId::new(1, 2, 3),
            app_url: "/pkg/1.2.3/codebase-indexer".into(),
            info_url: "/pkg/1.2.3/package.json".into(),
            status: None,
            updated_at: None,
        }
        .with_status(InstallStatus::Downloaded);

        write_version_file(dir.path(), &info).unwrap();
        let read = read_version_file(dir.path()).unwrap();
        assert_eq!(read.version_id, VersionId::new(1, 2, 3));
        assert_eq!(read.status, Some(InstallStatus::Downloaded));
        assert!(read.updated_at.is_some());
    }

    #[test]
    fn corrupt_version_file_reads_as_none() {
        let dir = TempDir::new().unwrap();
        std::fs::write(version_file_path(dir.path()), "{ nope").unwrap();
        assert!(read_version_file(dir.path()).is_none());
    }

    #[test]
    fn status_transition_stamps_updated_at() {
        let info = VersionInfo {
            version_id: VersionId::new(1, 0, 0),
            app_url: String::new(),
            info_url: String::new(),
            status: None,
            updated_at: None,
        };
        let downloading = info.with_status(InstallStatus::Downloading);
        assert_eq!(downloading.status, Some(InstallStatus::Downloading));
        assert!(downloading.updated_at.is_some());
    }
}
