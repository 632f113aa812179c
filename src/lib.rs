// SPDX-License-Identifier: MIT
//! Costrict engine core.
//!
//! Two subsystems behind one context object:
//! - the inline completion pipeline (request coordination, suggestion
//!   caching, cancellation supersession, acceptance tracking);
//! - the codebase-indexer lifecycle (install/upgrade with verified downloads,
//!   subprocess supervision, health-driven restarts).
//!
//! The host (an IDE extension layer, out of scope here) supplies credentials
//! through the [`completion::provider::CredentialStore`] seam and drives the
//! pipeline from editor events.

pub mod cancel;
pub mod completion;
pub mod config;
pub mod error;
pub mod indexer;
pub mod retry;

use std::sync::Arc;

use completion::acceptance::AcceptanceTracker;
use completion::provider::{CredentialStore, HttpCompletionProvider};
use completion::CompletionRequestCoordinator;
use config::EngineConfig;
use error::Result;
use indexer::{IndexerClient, IndexerLifecycleManager};

/// Long-lived engine state, constructed once at session start and passed by
/// reference. No global statics: every component that used to be a singleton
/// lives here so tests can build isolated instances.
pub struct EngineContext {
    pub config: Arc<EngineConfig>,
    pub coordinator: Arc<CompletionRequestCoordinator>,
    pub acceptance: Arc<AcceptanceTracker>,
    pub indexer: Arc<IndexerLifecycleManager>,
}

impl EngineContext {
    pub fn new(config: EngineConfig, credentials: Arc<dyn CredentialStore>) -> Result<Self> {
        let config = Arc::new(config);

        let provider = Arc::new(HttpCompletionProvider::new(config.completion.clone())?);
        let coordinator = Arc::new(CompletionRequestCoordinator::new(
            &config.completion,
            Arc::clone(&credentials),
            provider,
        ));

        let client = Arc::new(IndexerClient::new(
            Arc::clone(&config),
            Arc::clone(&credentials),
        )?);
        let indexer = IndexerLifecycleManager::new(Arc::clone(&config), client, credentials)?;

        Ok(Self {
            config,
            coordinator,
            acceptance: Arc::new(AcceptanceTracker::new()),
            indexer,
        })
    }

    /// Tear down background work on host deactivate. The indexer subprocess
    /// is deliberately left running; it is shared with other sessions.
    pub fn shutdown(&self) {
        self.coordinator.registry().cancel_all();
        self.indexer.shutdown();
    }
}
