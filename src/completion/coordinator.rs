// SPDX-License-Identifier: MIT
//! Completion request coordination.
//!
//! One `provide()` call per keystroke-triggered attempt. The coordinator owns
//! the supersession policy (newest request cancels all older ones), the
//! debounce, the cache lookup, and the single network fetch. Cancellation can
//! fire at any suspension boundary, so every re-entry point after an `await`
//! re-checks the token instead of trusting earlier checks.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cancel::CancellationRegistry;
use crate::config::CompletionConfig;
use crate::error::Result;

use super::cache::{CachedSuggestion, SuggestionCache};
use super::model::{strip_replacement_chars, CompletionOutcome, CompletionRequest};
use super::provider::{CompletionProvider, CredentialStore};

/// Orchestrates a single completion request end to end.
pub struct CompletionRequestCoordinator {
    registry: Arc<CancellationRegistry>,
    cache: Arc<Mutex<SuggestionCache>>,
    credentials: Arc<dyn CredentialStore>,
    provider: Arc<dyn CompletionProvider>,
    debounce: Duration,
}

impl CompletionRequestCoordinator {
    pub fn new(
        config: &CompletionConfig,
        credentials: Arc<dyn CredentialStore>,
        provider: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self {
            registry: Arc::new(CancellationRegistry::new()),
            cache: Arc::new(Mutex::new(SuggestionCache::new(config.cache_capacity))),
            credentials,
            provider,
            debounce: Duration::from_millis(config.debounce_ms),
        }
    }

    /// Shared suggestion history (exposed for diagnostics and tests).
    pub fn cache(&self) -> Arc<Mutex<SuggestionCache>> {
        Arc::clone(&self.cache)
    }

    /// Cancellation registry (exposed so hosts can cancel on deactivate).
    pub fn registry(&self) -> Arc<CancellationRegistry> {
        Arc::clone(&self.registry)
    }

    /// Resolve one completion attempt.
    ///
    /// Returns `Ok(None)` for every expected no-suggestion condition: no
    /// credentials, cancelled at any point, empty provider result. Only
    /// unexpected failures surface as `Err`.
    pub async fn provide(
        &self,
        request: CompletionRequest,
        external_token: Option<CancellationToken>,
    ) -> Result<Option<CompletionOutcome>> {
        // Only one logical completion is live client-side at a time.
        self.registry.cancel_all();

        let (token, registered) = match external_token {
            Some(t) => (t, false),
            None => (self.registry.register(&request.completion_id), true),
        };

        let result = self.provide_inner(&request, &token).await;

        if registered {
            self.registry.remove(&request.completion_id);
        }

        match result {
            Err(e) if e.is_cancelled() => Ok(None),
            other => other,
        }
    }

    async fn provide_inner(
        &self,
        request: &CompletionRequest,
        token: &CancellationToken,
    ) -> Result<Option<CompletionOutcome>> {
        if token.is_cancelled() {
            return Ok(None);
        }

        // No credentials → the feature is silently unavailable.
        let Some(credentials) = self.credentials.resolve().await else {
            debug!(completion_id = %request.completion_id, "no credentials, skipping completion");
            return Ok(None);
        };

        // Debounce, abandoned early if superseded during the wait.
        tokio::select! {
            _ = token.cancelled() => return Ok(None),
            _ = tokio::time::sleep(self.debounce) => {}
        }

        let prefix = &request.prompt.prefix;
        let suffix = &request.prompt.suffix;

        if let Some((text, source_id)) = self
            .cache
            .lock()
            .expect("suggestion cache poisoned")
            .find_matching(prefix, suffix)
        {
            debug!(
                completion_id = %request.completion_id,
                source_id = %source_id,
                "served from suggestion history"
            );
            return Ok(Some(CompletionOutcome {
                text,
                completion_id: request.completion_id.clone(),
                cache_hit: true,
            }));
        }

        // Exactly one network fetch per miss.
        let fetched = self.provider.fetch(&credentials, request, token).await?;
        let Some(raw) = fetched else {
            return Ok(None);
        };

        // Cache before the cancellation re-check: a result the user never
        // sees can still serve a later keystroke.
        let text = strip_replacement_chars(&raw);
        if !text.is_empty() {
            self.cache
                .lock()
                .expect("suggestion cache poisoned")
                .update(CachedSuggestion {
                    text,
                    prefix: prefix.clone(),
                    suffix: suffix.clone(),
                    completion_id: request.completion_id.clone(),
                });
        }

        // The user may have cancelled while the fetch was in flight.
        if token.is_cancelled() {
            return Ok(None);
        }

        // Re-run the lookup against the now-populated history.
        let matched = self
            .cache
            .lock()
            .expect("suggestion cache poisoned")
            .find_matching(prefix, suffix);
        let Some((text, _)) = matched else {
            return Ok(None);
        };

        if token.is_cancelled() {
            return Ok(None);
        }

        Ok(Some(CompletionOutcome {
            text,
            completion_id: request.completion_id.clone(),
            cache_hit: false,
        }))
    }
}
