// SPDX-License-Identifier: MIT
//! Error taxonomy for the engine core.
//!
//! Every expected failure mode gets its own discriminant so callers can match
//! on it instead of probing error messages:
//! - [`Error::Cancelled`] is not a real failure; the completion pipeline
//!   swallows it and returns no suggestion.
//! - [`Error::NotConfigured`] is a precondition failure ("feature unavailable",
//!   show a sign-in state), distinct from transient errors.
//! - [`Error::ChecksumMismatch`] is fatal for a download attempt; the corrupt
//!   file has already been deleted when this is returned.

use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The operation lost a race against its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// The active credential/provider is not the Costrict provider.
    /// Callers surface this as "feature unavailable", never as an error toast.
    #[error("costrict provider is not configured")]
    NotConfigured,

    /// A downloaded artifact failed integrity verification.
    /// Both digests are carried so supply-chain issues are diagnosable.
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// The manifest declared a hash algorithm this core cannot compute.
    /// Never silently fall back: an unverifiable binary is an unusable binary.
    #[error("unsupported checksum algorithm '{0}'")]
    UnsupportedChecksumAlgo(String),

    /// The indexer subprocess never published its endpoint to the well-known
    /// registry file within the discovery deadline.
    #[error("service '{service}' did not register within {timeout_secs}s")]
    ServiceDiscoveryTimeout { service: String, timeout_secs: u64 },

    /// The subprocess could not be started (all retry attempts exhausted).
    #[error("failed to start '{binary}' after {attempts} attempts")]
    StartFailed { binary: String, attempts: u32 },

    /// An RPC call was made before the subprocess registered its port.
    #[error("service '{0}' is not registered")]
    ServiceUnavailable(String),

    /// This host has no published indexer artifact.
    #[error("unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    /// The remote returned a non-success status for an API call.
    #[error("remote returned HTTP {status} for {url}")]
    RemoteStatus { status: u16, url: String },

    /// A de-duplicated status query failed; the message comes from the one
    /// shared underlying call.
    #[error("index status query for '{workspace}' failed: {message}")]
    StatusQuery { workspace: String, message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for the cancellation discriminant; callers treat this as
    /// "no result", never as a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// True for the tagged precondition failure (wrong/missing provider).
    pub fn is_not_configured(&self) -> bool {
        matches!(self, Error::NotConfigured)
    }
}
