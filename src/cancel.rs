// SPDX-License-Identifier: MIT
//! Cancellation registry: one token per in-flight completion request.
//!
//! The pipeline's supersession policy is "newest request wins": every new
//! request starts by cancelling all older in-flight tokens. Nothing is queued,
//! nothing is retried; stale requests simply abort at their next suspension
//! point.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Tracks a [`CancellationToken`] for each outstanding completion id.
///
/// Purely in-memory; dropped state disappears with the process.
#[derive(Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and track a fresh token for `completion_id`.
    ///
    /// Registering the same id twice replaces (and cancels) the old token.
    pub fn register(&self, completion_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        let mut tokens = self.tokens.lock().expect("cancellation registry poisoned");
        if let Some(old) = tokens.insert(completion_id.to_string(), token.clone()) {
            old.cancel();
        }
        token
    }

    /// Stop tracking `completion_id` without cancelling it.
    ///
    /// Called on every exit path of a request: success, failure, or cancel.
    pub fn remove(&self, completion_id: &str) {
        self.tokens
            .lock()
            .expect("cancellation registry poisoned")
            .remove(completion_id);
    }

    /// Cancel and drop every tracked token.
    pub fn cancel_all(&self) {
        let drained: Vec<(String, CancellationToken)> = self
            .tokens
            .lock()
            .expect("cancellation registry poisoned")
            .drain()
            .collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "cancelling in-flight completion requests");
        }
        for (_, token) in drained {
            token.cancel();
        }
    }

    /// Number of currently tracked tokens.
    pub fn len(&self) -> usize {
        self.tokens.lock().expect("cancellation registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
