// SPDX-License-Identifier: MIT
//! Indexer subprocess client: process supervision plus the local RPC surface.
//!
//! The subprocess is an external shared resource identified by binary name
//! and the well-known registry file, never by an owned handle: another
//! editor window may have started it first. "Already running" counts as a
//! successful start, and stop is best-effort and idempotent.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sysinfo::{ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use crate::completion::provider::CredentialStore;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::indexer::registry;

const RPC_PREFIX: &str = "/codebase-indexer/api/v1";

// ─── RPC types ────────────────────────────────────────────────────────────────

/// Kind of workspace file change published to the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEventType {
    Added,
    Modified,
    Deleted,
    Renamed,
}

/// One workspace file change. Events are published in batches.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEvent {
    pub event_type: FileEventType,
    pub source_path: String,
    /// Only set for renames.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_path: String,
}

/// Which index to (re)build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildType {
    Embedding,
    Codegraph,
    All,
}

impl BuildType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildType::Embedding => "embedding",
            BuildType::Codegraph => "codegraph",
            BuildType::All => "all",
        }
    }
}

/// Index build state for one workspace.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatus {
    #[serde(default)]
    pub workspace: String,
    pub status: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub total_files: u64,
    #[serde(default)]
    pub total_succeed: u64,
    #[serde(default)]
    pub total_failed: u64,
}

// ─── Supervision seam ─────────────────────────────────────────────────────────

/// Subprocess operations the lifecycle manager depends on.
///
/// A trait so the manager's retry/health/dedup logic is testable without a
/// real subprocess.
#[async_trait]
pub trait IndexerRpc: Send + Sync {
    /// OS-level liveness by process name (not an owned handle).
    fn is_running(&self) -> bool;
    /// Launch the binary detached; success if it is (already) running.
    async fn start(&self) -> Result<()>;
    /// Kill every process matching the binary name. Best-effort.
    fn stop(&self);
    /// HTTP health endpoint; `Ok(false)` means reachable-but-unhealthy.
    async fn check_health(&self) -> Result<bool>;
    async fn fetch_index_status(&self, workspace: &str) -> Result<IndexStatus>;
}

// ─── Client ───────────────────────────────────────────────────────────────────

/// Concrete client for the native codebase-indexer.
pub struct IndexerClient {
    config: Arc<EngineConfig>,
    binary_path: PathBuf,
    http: reqwest::Client,
    credentials: Arc<dyn CredentialStore>,
}

impl IndexerClient {
    pub fn new(config: Arc<EngineConfig>, credentials: Arc<dyn CredentialStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        let binary_path = config.indexer_binary_path();
        Ok(Self {
            config,
            binary_path,
            http,
            credentials,
        })
    }

    fn process_name(&self) -> String {
        crate::indexer::platform::binary_file_name(&self.config.indexer.binary_name)
    }

    /// RPC base URL, discovered from the well-known registry at call time.
    fn rpc_base(&self) -> Result<String> {
        let service = &self.config.indexer.binary_name;
        let registry = registry::read_registry(&self.config.data_dir)
            .ok_or_else(|| Error::ServiceUnavailable(service.clone()))?;
        let entry = registry
            .find_running(service)
            .ok_or_else(|| Error::ServiceUnavailable(service.clone()))?;
        Ok(format!("{}{}", entry.endpoint(), RPC_PREFIX))
    }

    async fn rpc_request(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let creds = self
            .credentials
            .resolve()
            .await
            .ok_or(Error::NotConfigured)?;
        let response = builder
            .header("X-Request-ID", uuid::Uuid::new_v4().to_string())
            .header("Client-ID", &creds.machine_id)
            .header("Server-Endpoint", &creds.base_url)
            .bearer_auth(&creds.access_token)
            .send()
            .await?;
        Ok(response)
    }

    /// Publish a batch of workspace file events.
    pub async fn publish_events(&self, workspace: &str, events: &[FileEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let url = format!("{}/events", self.rpc_base()?);
        let body = serde_json::json!({ "workspace": workspace, "data": events });
        let response = self.rpc_request(self.http.post(&url).json(&body)).await?;
        ensure_success(response, &url)?;
        debug!(workspace = %workspace, count = events.len(), "file events published");
        Ok(())
    }

    /// Trigger an index build.
    pub async fn trigger_build(&self, build: BuildType, workspace: &str) -> Result<()> {
        let url = format!("{}/index", self.rpc_base()?);
        let body = serde_json::json!({ "type": build.as_str(), "workspace": workspace });
        let response = self.rpc_request(self.http.post(&url).json(&body)).await?;
        ensure_success(response, &url)?;
        info!(workspace = %workspace, build = build.as_str(), "index build triggered");
        Ok(())
    }

    /// Toggle indexing on or off.
    pub async fn set_index_switch(&self, enabled: bool) -> Result<()> {
        let url = format!("{}/switch", self.rpc_base()?);
        let body = serde_json::json!({ "switch": if enabled { "on" } else { "off" } });
        let response = self.rpc_request(self.http.post(&url).json(&body)).await?;
        ensure_success(response, &url)?;
        Ok(())
    }

    /// Ask the indexer which of `paths` its ignore rules exclude.
    pub async fn check_ignore(&self, workspace: &str, paths: &[String]) -> Result<Vec<String>> {
        let url = format!("{}/files/ignore", self.rpc_base()?);
        let body = serde_json::json!({ "workspace": workspace, "paths": paths });
        let response = self.rpc_request(self.http.post(&url).json(&body)).await?;
        let response = ensure_success(response, &url)?;

        #[derive(Deserialize)]
        struct IgnoreResponse {
            #[serde(default)]
            ignored: Vec<String>,
        }
        Ok(response.json::<IgnoreResponse>().await?.ignored)
    }
}

fn ensure_success(response: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(Error::RemoteStatus {
            status: response.status().as_u16(),
            url: url.to_string(),
        })
    }
}

/// Pick an ephemeral free local port by binding and immediately releasing it.
fn free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

#[async_trait]
impl IndexerRpc for IndexerClient {
    fn is_running(&self) -> bool {
        let name = self.process_name();
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::All, true);
        let mut matches = sys.processes_by_name(OsStr::new(&name));
        matches.next().is_some()
    }

    async fn start(&self) -> Result<()> {
        if self.is_running() {
            debug!("indexer already running, treating start as success");
            return Ok(());
        }

        let port = free_port()?;
        info!(
            binary = %self.binary_path.display(),
            port,
            "starting indexer subprocess"
        );

        let mut command = std::process::Command::new(&self.binary_path);
        command
            .arg("--port")
            .arg(port.to_string())
            .arg("--data-dir")
            .arg(&self.config.data_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Detach from our process group so the indexer outlives this session.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        // The Child handle is intentionally dropped: liveness is tracked via
        // the OS process table, and the process may outlive us anyway.
        command.spawn()?;
        Ok(())
    }

    fn stop(&self) {
        let name = self.process_name();
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::All, true);
        let mut killed = 0;
        for process in sys.processes_by_name(OsStr::new(&name)) {
            if process.kill() {
                killed += 1;
            }
        }
        if killed > 0 {
            info!(name = %name, killed, "stopped indexer processes");
        } else {
            debug!(name = %name, "no indexer process to stop");
        }
    }

    async fn check_health(&self) -> Result<bool> {
        let url = format!("{}/healthz", self.rpc_base()?);
        match self.rpc_request(self.http.get(&url)).await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                warn!("health probe failed: {e}");
                Ok(false)
            }
        }
    }

    async fn fetch_index_status(&self, workspace: &str) -> Result<IndexStatus> {
        let url = format!("{}/index/status", self.rpc_base()?);
        let response = self
            .rpc_request(self.http.get(&url).query(&[("workspace", workspace)]))
            .await?;
        let response = ensure_success(response, &url)?;
        Ok(response.json::<IndexStatus>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::provider::Credentials;

    struct NoCreds;

    #[async_trait]
    impl CredentialStore for NoCreds {
        async fn resolve(&self) -> Option<Credentials> {
            None
        }
    }

    #[test]
    fn liveness_is_false_for_an_unknown_binary() {
        let mut config = EngineConfig::default();
        config.indexer.binary_name = "costrict-no-such-binary".into();
        let client = IndexerClient::new(Arc::new(config), Arc::new(NoCreds)).unwrap();
        assert!(!client.is_running());
    }

    #[test]
    fn build_type_wire_strings() {
        assert_eq!(BuildType::Embedding.as_str(), "embedding");
        assert_eq!(BuildType::Codegraph.as_str(), "codegraph");
        assert_eq!(BuildType::All.as_str(), "all");
    }

    #[test]
    fn free_port_is_bindable() {
        let port = free_port().unwrap();
        assert!(port > 0);
    }

    #[test]
    fn file_event_serializes_camel_case() {
        let event = FileEvent {
            event_type: FileEventType::Renamed,
            source_path: "src/a.rs".into(),
            target_path: "src/b.rs".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "renamed");
        assert_eq!(json["sourcePath"], "src/a.rs");
        assert_eq!(json["targetPath"], "src/b.rs");
    }

    #[test]
    fn index_status_parses_minimal_payload() {
        let status: IndexStatus =
            serde_json::from_str(r#"{"status": "building", "progress": 42.5}"#).unwrap();
        assert_eq!(status.status, "building");
        assert!((status.progress - 42.5).abs() < 1e-9);
        assert_eq!(status.total_files, 0);
    }
}
