// SPDX-License-Identifier: MIT
//! Codebase-indexer lifecycle: platform detection, release metadata, verified
//! binary download, subprocess supervision, and the top-level manager.

pub mod api;
pub mod client;
pub mod download;
pub mod manager;
pub mod platform;
pub mod registry;
pub mod version;

pub use client::IndexerClient;
pub use manager::{IndexerLifecycleManager, UpgradeOutcome};
