// SPDX-License-Identifier: MIT
//! Host platform detection.
//!
//! Maps the compile-target OS/arch onto the canonical strings used in release
//! manifest paths (`{base}/{platform}/{arch}/platform.json`).

use crate::error::{Error, Result};

/// Canonical platform string: `"windows"`, `"darwin"`, or `"linux"`.
pub fn platform() -> Result<&'static str> {
    match std::env::consts::OS {
        "windows" => Ok("windows"),
        "macos" => Ok("darwin"),
        "linux" => Ok("linux"),
        _ => Err(unsupported()),
    }
}

/// Canonical architecture string: `"amd64"` or `"arm64"`.
pub fn arch() -> Result<&'static str> {
    match std::env::consts::ARCH {
        "x86_64" => Ok("amd64"),
        "aarch64" => Ok("arm64"),
        _ => Err(unsupported()),
    }
}

/// File name of the indexer binary on this host (`.exe` suffix on Windows).
pub fn binary_file_name(base: &str) -> String {
    if cfg!(windows) {
        format!("{base}.exe")
    } else {
        base.to_string()
    }
}

fn unsupported() -> Error {
    Error::UnsupportedPlatform {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
    }
}
