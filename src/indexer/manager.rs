// SPDX-License-Identifier: MIT
//! Indexer lifecycle manager.
//!
//! Top-level orchestration: compare installed vs. latest version, drive
//! install/upgrade, start the subprocess, wait for it to publish its endpoint,
//! and keep it alive with a periodic health loop that restarts after repeated
//! failures. Also de-duplicates concurrent index-status queries.
//!
//! Expected branch outcomes (no update, download failed, wrong provider) come
//! back as [`UpgradeOutcome`] values; `Err` is reserved for conditions the
//! caller cannot anticipate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::completion::provider::{Credentials, CredentialStore};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::indexer::api::ReleaseApi;
use crate::indexer::client::{IndexStatus, IndexerRpc};
use crate::indexer::download::SecureFileDownloader;
use crate::indexer::registry::{self, AuthFile, ServiceEntry};
use crate::indexer::version::{self, InstallStatus};
use crate::retry::{retry_with_backoff, RetryPolicy};

/// Result of a version check-and-upgrade pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// No usable local install existed; the newest version was installed.
    FirstInstall,
    /// A local install was replaced by a newer version.
    Upgraded,
    /// Local install is current.
    NoUpdate,
    /// Manifest fetch or download failed; the old install (if any) is kept.
    Failed,
    /// The Costrict provider is not active: feature unavailable, not an error.
    NotConfigured,
}

// ─── Health monitor ───────────────────────────────────────────────────────────

/// Counts consecutive combined liveness/health failures.
///
/// A restart fires once the count *exceeds* `max_failures` (with the default
/// of 2, on the third consecutive failure). Any success resets the count, and
/// firing resets it too, so a restart attempt gets a clean slate regardless of
/// whether it succeeds.
#[derive(Debug)]
pub struct HealthMonitor {
    failures: u32,
    max_failures: u32,
}

impl HealthMonitor {
    pub fn new(max_failures: u32) -> Self {
        Self {
            failures: 0,
            max_failures,
        }
    }

    /// Record one tick. Returns `true` when a restart should fire.
    pub fn record(&mut self, healthy: bool) -> bool {
        if healthy {
            self.failures = 0;
            return false;
        }
        self.failures += 1;
        if self.failures > self.max_failures {
            self.failures = 0;
            true
        } else {
            false
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }
}

// ─── Manager ──────────────────────────────────────────────────────────────────

type StatusFuture = Shared<BoxFuture<'static, std::result::Result<IndexStatus, Arc<Error>>>>;

/// Owns the indexer subprocess lifecycle for one session.
///
/// Constructed once (see `EngineContext`) and shared via `Arc`.
pub struct IndexerLifecycleManager {
    config: Arc<EngineConfig>,
    rpc: Arc<dyn IndexerRpc>,
    credentials: Arc<dyn CredentialStore>,
    api: ReleaseApi,
    downloader: SecureFileDownloader,
    initialized: tokio::sync::Mutex<bool>,
    /// In-flight status queries, keyed by workspace; concurrent callers share
    /// one underlying network call.
    status_flights: Arc<tokio::sync::Mutex<HashMap<String, StatusFuture>>>,
    /// Completed results, served for a short TTL to absorb call bursts.
    status_cache: Arc<std::sync::Mutex<HashMap<String, (Instant, IndexStatus)>>>,
    health_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    sweep_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl IndexerLifecycleManager {
    pub fn new(
        config: Arc<EngineConfig>,
        rpc: Arc<dyn IndexerRpc>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Arc<Self>> {
        let api = ReleaseApi::new(config.base_url.clone())?;
        let downloader = SecureFileDownloader::new(config.base_url.clone())?;
        Ok(Arc::new(Self {
            config,
            rpc,
            credentials,
            api,
            downloader,
            initialized: tokio::sync::Mutex::new(false),
            status_flights: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            status_cache: Arc::new(std::sync::Mutex::new(HashMap::new())),
            health_task: std::sync::Mutex::new(None),
            sweep_task: std::sync::Mutex::new(None),
        }))
    }

    /// Bring the indexer up: version check, install/upgrade if needed, start,
    /// discover the endpoint, begin health monitoring. Idempotent: a second
    /// call while initialized is a no-op.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            debug!("indexer manager already initialized");
            return Ok(());
        }

        self.ensure_ready().await?;

        let outcome = self.check_and_upgrade().await?;
        info!(?outcome, "indexer version check finished");

        self.start_client().await?;
        let entry = self.wait_for_service().await?;
        info!(port = entry.port, "indexer service endpoint discovered");

        self.spawn_health_loop();
        self.spawn_status_sweep();
        *initialized = true;
        Ok(())
    }

    /// Tagged precondition gate: every public operation needs the Costrict
    /// provider to be the active one.
    async fn ensure_ready(&self) -> Result<Credentials> {
        self.credentials.resolve().await.ok_or(Error::NotConfigured)
    }

    /// Compare installed vs. latest version and install/upgrade as needed.
    pub async fn check_and_upgrade(&self) -> Result<UpgradeOutcome> {
        if self.credentials.resolve().await.is_none() {
            return Ok(UpgradeOutcome::NotConfigured);
        }

        let manifest = match self.api.fetch_platform_manifest().await {
            Ok(m) => m,
            Err(e) => {
                warn!("platform manifest fetch failed: {e}");
                return Ok(UpgradeOutcome::Failed);
            }
        };

        let binary_path = self.config.indexer_binary_path();
        let local = version::read_version_file(&self.config.data_dir);
        // A local record only counts when the download completed AND the
        // binary is still on disk.
        let installed = local
            .as_ref()
            .filter(|v| v.status == Some(InstallStatus::Downloaded) && binary_path.exists())
            .map(|v| v.version_id);
        let first_install = installed.is_none();

        if !version::should_update(installed, manifest.newest.version_id) {
            debug!(version = %manifest.newest.version_id, "indexer is up to date");
            return Ok(UpgradeOutcome::NoUpdate);
        }

        info!(
            local = %installed.map(|v| v.to_string()).unwrap_or_else(|| "none".into()),
            remote = %manifest.newest.version_id,
            "installing indexer"
        );

        // Best-effort: a running old binary cannot be replaced on some
        // platforms. Failures here are ignored.
        self.rpc.stop();

        let package = match self.api.fetch_package_info(&manifest.newest.info_url).await {
            Ok(p) => p,
            Err(e) => {
                warn!("package info fetch failed: {e}");
                return Ok(UpgradeOutcome::Failed);
            }
        };

        version::write_version_file(
            &self.config.data_dir,
            &manifest.newest.with_status(InstallStatus::Downloading),
        )?;

        match self
            .downloader
            .download(&binary_path, &manifest.newest, &package, None)
            .await
        {
            Ok(_) => {
                version::write_version_file(
                    &self.config.data_dir,
                    &manifest.newest.with_status(InstallStatus::Downloaded),
                )?;
                Ok(if first_install {
                    UpgradeOutcome::FirstInstall
                } else {
                    UpgradeOutcome::Upgraded
                })
            }
            Err(e) => {
                warn!("indexer download failed: {e}");
                let _ = version::write_version_file(
                    &self.config.data_dir,
                    &manifest.newest.with_status(InstallStatus::Failed),
                );
                Ok(UpgradeOutcome::Failed)
            }
        }
    }

    /// Launch the subprocess, retrying with linear backoff. Hands credentials
    /// over via auth.json first. "Already running" is success.
    pub async fn start_client(&self) -> Result<()> {
        if self.rpc.is_running() {
            debug!("indexer process already alive");
            return Ok(());
        }

        let creds = self.ensure_ready().await?;
        registry::write_auth_file(
            &self.config.data_dir,
            &AuthFile {
                id: creds.id.clone(),
                name: self.config.client_name.clone(),
                access_token: creds.access_token.clone(),
                machine_id: creds.machine_id.clone(),
                base_url: creds.base_url.clone(),
            },
        )?;

        let attempts = self.config.indexer.start_attempts;
        let policy = RetryPolicy::linear(attempts, Duration::from_millis(1000));
        let binary = self.config.indexer.binary_name.clone();
        let binary_name = binary.as_str();

        retry_with_backoff(&policy, || async move {
            self.rpc.start().await?;
            if self.rpc.is_running() {
                Ok(())
            } else {
                Err(Error::StartFailed {
                    binary: binary_name.to_string(),
                    attempts: 1,
                })
            }
        })
        .await
        .map_err(|_| Error::StartFailed {
            binary: binary.clone(),
            attempts,
        })
    }

    /// Wait for the subprocess to publish its endpoint in the well-known
    /// registry file: poll every 5 s for the first 5 minutes, then every 30 s,
    /// up to a hard deadline. Past the deadline this is a terminal failure;
    /// a permanently-wedged subprocess must surface, not spin silently.
    pub async fn wait_for_service(&self) -> Result<ServiceEntry> {
        let cfg = &self.config.indexer;
        let service = cfg.binary_name.clone();
        let started = Instant::now();
        let deadline = Duration::from_secs(cfg.discovery_timeout_secs);
        let fast_window = Duration::from_secs(cfg.discovery_fast_window_secs);

        loop {
            if let Some(reg) = registry::read_registry(&self.config.data_dir) {
                if let Some(entry) = reg.find_running(&service) {
                    return Ok(entry.clone());
                }
            }

            if started.elapsed() >= deadline {
                return Err(Error::ServiceDiscoveryTimeout {
                    service,
                    timeout_secs: cfg.discovery_timeout_secs,
                });
            }

            let interval = if started.elapsed() < fast_window {
                cfg.discovery_fast_interval_secs
            } else {
                cfg.discovery_slow_interval_secs
            };
            tokio::time::sleep(Duration::from_secs(interval)).await;
        }
    }

    /// Stop the subprocess and run the full initialize sequence again.
    pub async fn restart_client(self: &Arc<Self>) -> Result<()> {
        warn!("restarting indexer");
        self.rpc.stop();
        *self.initialized.lock().await = false;
        self.initialize().await
    }

    /// Workspace index status, de-duplicated: concurrent callers share one
    /// underlying RPC, and completed results are served from a short-TTL
    /// cache to absorb bursts.
    ///
    /// Fails with the tagged [`Error::NotConfigured`] before touching the
    /// flight map, so the precondition discriminant survives the dedup layer.
    pub async fn index_status(&self, workspace: &str) -> Result<IndexStatus> {
        self.ensure_ready().await?;

        let ttl = Duration::from_millis(self.config.indexer.status_cache_ttl_ms);
        {
            let cache = self.status_cache.lock().expect("status cache poisoned");
            if let Some((at, status)) = cache.get(workspace) {
                if at.elapsed() <= ttl {
                    return Ok(status.clone());
                }
            }
        }

        let future = {
            let mut flights = self.status_flights.lock().await;
            match flights.get(workspace) {
                Some(f) => f.clone(),
                None => {
                    let rpc = Arc::clone(&self.rpc);
                    let cache = Arc::clone(&self.status_cache);
                    let flights_map = Arc::clone(&self.status_flights);
                    let ws = workspace.to_string();
                    let f: StatusFuture = async move {
                        let result = rpc.fetch_index_status(&ws).await.map_err(Arc::new);
                        if let Ok(status) = &result {
                            cache
                                .lock()
                                .expect("status cache poisoned")
                                .insert(ws.clone(), (Instant::now(), status.clone()));
                        }
                        flights_map.lock().await.remove(&ws);
                        result
                    }
                    .boxed()
                    .shared();
                    flights.insert(workspace.to_string(), f.clone());
                    f
                }
            }
        };

        future.await.map_err(|e| {
            // Credentials can also vanish mid-flight; keep the tag either way.
            if e.is_not_configured() {
                Error::NotConfigured
            } else {
                Error::StatusQuery {
                    workspace: workspace.to_string(),
                    message: e.to_string(),
                }
            }
        })
    }

    /// Stop background loops. Called on host deactivate; the subprocess
    /// itself is left running (it is a shared resource).
    pub fn shutdown(&self) {
        if let Some(task) = self.health_task.lock().expect("task slot poisoned").take() {
            task.abort();
        }
        if let Some(task) = self.sweep_task.lock().expect("task slot poisoned").take() {
            task.abort();
        }
    }

    // ─── Background loops ─────────────────────────────────────────────────────

    fn spawn_health_loop(self: &Arc<Self>) {
        let mut slot = self.health_task.lock().expect("task slot poisoned");
        if slot.is_some() {
            return;
        }
        let this = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            let period = Duration::from_secs(this.config.indexer.health_interval_secs);
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // the first tick completes immediately
            let mut monitor = HealthMonitor::new(this.config.indexer.max_health_failures);

            loop {
                interval.tick().await;
                let healthy =
                    this.rpc.is_running() && this.rpc.check_health().await.unwrap_or(false);
                if monitor.record(healthy) {
                    warn!("health threshold exceeded, restarting indexer");
                    if let Err(e) = this.restart_client().await {
                        warn!("indexer restart failed: {e}");
                    }
                }
            }
        }));
    }

    fn spawn_status_sweep(self: &Arc<Self>) {
        let mut slot = self.sweep_task.lock().expect("task slot poisoned");
        if slot.is_some() {
            return;
        }
        let cache = Arc::clone(&self.status_cache);
        let max_age = Duration::from_secs(self.config.indexer.status_sweep_max_age_secs);
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                cache
                    .lock()
                    .expect("status cache poisoned")
                    .retain(|_, (at, _)| at.elapsed() < max_age);
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_fires_on_third_consecutive_failure_only() {
        let mut monitor = HealthMonitor::new(2);
        assert!(!monitor.record(false));
        assert!(!monitor.record(false));
        // Third consecutive failure exceeds the threshold.
        assert!(monitor.record(false));
        // Counter was reset by firing.
        assert_eq!(monitor.consecutive_failures(), 0);
    }

    #[test]
    fn success_resets_the_failure_counter() {
        let mut monitor = HealthMonitor::new(2);
        assert!(!monitor.record(false));
        assert!(!monitor.record(false));
        assert!(!monitor.record(true));
        assert_eq!(monitor.consecutive_failures(), 0);
        // The streak starts over.
        assert!(!monitor.record(false));
        assert!(!monitor.record(false));
        assert!(monitor.record(false));
    }

    #[test]
    fn two_failures_never_fire() {
        let mut monitor = HealthMonitor::new(2);
        for _ in 0..10 {
            assert!(!monitor.record(false));
            assert!(!monitor.record(false));
            assert!(!monitor.record(true));
        }
    }
}
