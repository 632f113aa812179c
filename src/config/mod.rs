// SPDX-License-Identifier: MIT
//! Engine configuration.
//!
//! Priority (highest to lowest):
//!   1. Environment (`COSTRICT_BASE_URL`, `COSTRICT_DATA_DIR`)
//!   2. TOML file at `{data_dir}/config.toml`
//!   3. Built-in defaults

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

const DEFAULT_BASE_URL: &str = "https://zgsm.sangfor.com";
const DEFAULT_CLIENT_NAME: &str = "costrict";

// ─── CompletionConfig ─────────────────────────────────────────────────────────

/// Completion pipeline tuning (`[completion]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Debounce applied before any network fetch (milliseconds). Default: 300.
    pub debounce_ms: u64,
    /// Bound on the suggestion history; oldest entry evicted on overflow.
    /// Default: 20.
    pub cache_capacity: usize,
    /// Prefix context sent to the provider is clipped to this many bytes
    /// (from the right). Default: 4000.
    pub max_prefix_chars: usize,
    /// Suffix context clipped to this many bytes (from the left). Default: 2000.
    pub max_suffix_chars: usize,
    /// Completion endpoint request timeout (seconds). Default: 30.
    pub request_timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            cache_capacity: 20,
            max_prefix_chars: 4000,
            max_suffix_chars: 2000,
            request_timeout_secs: 30,
        }
    }
}

// ─── IndexerConfig ────────────────────────────────────────────────────────────

/// Codebase-indexer lifecycle tuning (`[indexer]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Base name of the native indexer binary (platform suffix added on
    /// Windows). Also the name looked up in the OS process table and the
    /// well-known registry file.
    pub binary_name: String,
    /// Seconds between health-check ticks. Default: 60.
    pub health_interval_secs: u64,
    /// Consecutive combined liveness/health failures tolerated before a
    /// restart fires. Default: 2 (the restart happens on the third failure).
    pub max_health_failures: u32,
    /// Subprocess start attempts, with linear backoff between them. Default: 4.
    pub start_attempts: u32,
    /// Service-discovery poll cadence while inside the fast window (seconds).
    /// Default: 5.
    pub discovery_fast_interval_secs: u64,
    /// Length of the fast-poll window (seconds). Default: 300.
    pub discovery_fast_window_secs: u64,
    /// Poll cadence after the fast window (seconds). Default: 30.
    pub discovery_slow_interval_secs: u64,
    /// Hard deadline on service discovery (seconds); past it the start fails
    /// with an explicit timeout error instead of polling forever. Default: 900.
    pub discovery_timeout_secs: u64,
    /// Completed status-query results are served from cache for this long
    /// (milliseconds) to absorb call bursts. Default: 1000.
    pub status_cache_ttl_ms: u64,
    /// Background sweep evicts status-cache entries older than this (seconds).
    /// Default: 300.
    pub status_sweep_max_age_secs: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            binary_name: "codebase-indexer".to_string(),
            health_interval_secs: 60,
            max_health_failures: 2,
            start_attempts: 4,
            discovery_fast_interval_secs: 5,
            discovery_fast_window_secs: 300,
            discovery_slow_interval_secs: 30,
            discovery_timeout_secs: 900,
            status_cache_ttl_ms: 1000,
            status_sweep_max_age_secs: 300,
        }
    }
}

// ─── EngineConfig ─────────────────────────────────────────────────────────────

/// Top-level engine configuration, built once at session start and shared by
/// reference (see `EngineContext`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Base URL of the remote Costrict service (manifests, packages,
    /// completion endpoint).
    pub base_url: String,
    /// Per-user data directory: version.json, auth.json, the well-known
    /// registry file, and the installed indexer binary live here.
    pub data_dir: PathBuf,
    /// Client name reported in RPC headers and the auth handoff file.
    pub client_name: String,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
}

/// Optional-field mirror of [`EngineConfig`] for the TOML layer.
#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    base_url: Option<String>,
    client_name: Option<String>,
    #[serde(default)]
    completion: Option<CompletionConfig>,
    #[serde(default)]
    indexer: Option<IndexerConfig>,
}

impl EngineConfig {
    /// Build config from explicit overrides + TOML file + defaults.
    pub fn new(base_url: Option<String>, data_dir: Option<PathBuf>) -> Self {
        let data_dir = data_dir
            .or_else(|| std::env::var_os("COSTRICT_DATA_DIR").map(PathBuf::from))
            .unwrap_or_else(default_data_dir);

        let toml = load_toml(&data_dir).unwrap_or_default();

        let base_url = std::env::var("COSTRICT_BASE_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .or(base_url)
            .or(toml.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let client_name = toml
            .client_name
            .unwrap_or_else(|| DEFAULT_CLIENT_NAME.to_string());

        Self {
            base_url,
            data_dir,
            client_name,
            completion: toml.completion.unwrap_or_default(),
            indexer: toml.indexer.unwrap_or_default(),
        }
    }

    /// Path where the installed indexer binary lives.
    pub fn indexer_binary_path(&self) -> PathBuf {
        self.data_dir
            .join("bin")
            .join(crate::indexer::platform::binary_file_name(
                &self.indexer.binary_name,
            ))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            data_dir: default_data_dir(),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            completion: CompletionConfig::default(),
            indexer: IndexerConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(windows)]
    let home = std::env::var_os("USERPROFILE");
    #[cfg(not(windows))]
    let home = std::env::var_os("HOME");

    home.map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".costrict")
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let content = std::fs::read_to_string(&path).ok()?;
    match toml::from_str(&content) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            warn!(path = %path.display(), "ignoring malformed config.toml: {e}");
            None
        }
    }
}
