// SPDX-License-Identifier: MIT
//! Local service registry and credential handoff files.
//!
//! The indexer binds an ephemeral port; there is no fixed port contract.
//! Once running it writes `.well-known.json` into the data directory; this
//! core only ever reads that file to discover the RPC endpoint.
//!
//! `auth.json` flows the other way: this core writes it so the subprocess can
//! authenticate against the backend.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

pub const WELL_KNOWN_FILE: &str = ".well-known.json";
pub const AUTH_FILE: &str = "auth.json";

/// Running status a service must report before its endpoint is trusted.
pub const STATUS_RUNNING: &str = "running";

/// One advertised local service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    pub protocol: String,
    pub port: u16,
    pub status: String,
}

impl ServiceEntry {
    /// Local endpoint URL for this entry.
    pub fn endpoint(&self) -> String {
        format!("{}://127.0.0.1:{}", self.protocol, self.port)
    }
}

/// Contents of the well-known registry file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceRegistry {
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
}

impl ServiceRegistry {
    /// Entry for `name`, only when it reports itself running.
    pub fn find_running(&self, name: &str) -> Option<&ServiceEntry> {
        self.services
            .iter()
            .find(|s| s.name == name && s.status == STATUS_RUNNING)
    }
}

pub fn well_known_path(data_dir: &Path) -> PathBuf {
    data_dir.join(WELL_KNOWN_FILE)
}

/// Read the registry file. Missing or corrupt reads as `None`: the file is
/// written by another process and may be mid-write.
pub fn read_registry(data_dir: &Path) -> Option<ServiceRegistry> {
    let path = well_known_path(data_dir);
    let content = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&content) {
        Ok(reg) => Some(reg),
        Err(e) => {
            warn!(path = %path.display(), "unreadable service registry (mid-write?): {e}");
            None
        }
    }
}

/// Credentials handed to the indexer subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthFile {
    pub id: String,
    pub name: String,
    pub access_token: String,
    pub machine_id: String,
    pub base_url: String,
}

pub fn write_auth_file(data_dir: &Path, auth: &AuthFile) -> Result<()> {
    std::fs::create_dir_all(data_dir)?;
    let content = serde_json::to_string_pretty(auth)?;
    std::fs::write(data_dir.join(AUTH_FILE), content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn find_running_requires_running_status() {
        let reg = ServiceRegistry {
            services: vec![
                ServiceEntry {
                    name: "codebase-indexer".into(),
                    protocol: "http".into(),
                    port: 54321,
                    status: "starting".into(),
                },
                ServiceEntry {
                    name: "other".into(),
                    protocol: "http".into(),
                    port: 54322,
                    status: STATUS_RUNNING.into(),
                },
            ],
        };
        assert!(reg.find_running("codebase-indexer").is_none());
        assert!(reg.find_running("other").is_some());
    }

    #[test]
    fn endpoint_formats_local_url() {
        let entry = ServiceEntry {
            name: "codebase-indexer".into(),
            protocol: "http".into(),
            port: 4800,
            status: STATUS_RUNNING.into(),
        };
        assert_eq!(entry.endpoint(), "http://127.0.0.1:4800");
    }

    #[test]
    fn registry_read_tolerates_missing_and_corrupt_files() {
        let dir = TempDir::new().unwrap();
        assert!(read_registry(dir.path()).is_none());

        std::fs::write(well_known_path(dir.path()), "{ half-writ").unwrap();
        assert!(read_registry(dir.path()).is_none());

        std::fs::write(
            well_known_path(dir.path()),
            r#"{"services":[{"name":"codebase-indexer","protocol":"http","port":9000,"status":"running"}]}"#,
        )
        .unwrap();
        let reg = read_registry(dir.path()).unwrap();
        assert_eq!(reg.find_running("codebase-indexer").unwrap().port, 9000);
    }

    #[test]
    fn auth_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let auth = AuthFile {
            id: "user-1".into(),
            name: "dev".into(),
            access_token: "tok".into(),
            machine_id: "m-1".into(),
            base_url: "https://zgsm.example.com".into(),
        };
        write_auth_file(dir.path(), &auth).unwrap();

        let read: AuthFile = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join(AUTH_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(read.access_token, "tok");
        assert_eq!(read.machine_id, "m-1");
    }
}
