// SPDX-License-Identifier: MIT
//! Integration tests for the completion pipeline: cache reuse, cancellation
//! races, garbled-output normalization, and acceptance tracking.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use costrict::completion::acceptance::{AcceptanceTracker, DocumentState, Position};
use costrict::completion::cache::CachedSuggestion;
use costrict::completion::model::{
    new_completion_id, CompletionRequest, HideScoreInputs, PromptOptions,
};
use costrict::completion::provider::{CompletionProvider, CredentialStore, Credentials};
use costrict::completion::CompletionRequestCoordinator;
use costrict::config::CompletionConfig;
use costrict::error::Result;

// ─── Test doubles ─────────────────────────────────────────────────────────────

struct StaticCredentials;

#[async_trait]
impl CredentialStore for StaticCredentials {
    async fn resolve(&self) -> Option<Credentials> {
        Some(Credentials {
            id: "user-1".into(),
            name: "dev".into(),
            access_token: "tok".into(),
            machine_id: "m-1".into(),
            base_url: "https://zgsm.example.com".into(),
        })
    }
}

struct NoCredentials;

#[async_trait]
impl CredentialStore for NoCredentials {
    async fn resolve(&self) -> Option<Credentials> {
        None
    }
}

/// Returns a fixed response and counts network calls.
struct MockProvider {
    response: Option<String>,
    calls: AtomicU32,
    /// When set, fires this token just before returning, simulating a user
    /// cancel while the request was in flight.
    cancel_on_return: Option<CancellationToken>,
}

impl MockProvider {
    fn returning(text: &str) -> Arc<Self> {
        Arc::new(Self {
            response: Some(text.to_string()),
            calls: AtomicU32::new(0),
            cancel_on_return: None,
        })
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn fetch(
        &self,
        _credentials: &Credentials,
        _request: &CompletionRequest,
        _token: &CancellationToken,
    ) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(token) = &self.cancel_on_return {
            token.cancel();
        }
        Ok(self.response.clone())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fast_config() -> CompletionConfig {
    CompletionConfig {
        debounce_ms: 1,
        ..CompletionConfig::default()
    }
}

fn build_coordinator(
    credentials: Arc<dyn CredentialStore>,
    provider: Arc<dyn CompletionProvider>,
) -> CompletionRequestCoordinator {
    init_tracing();
    CompletionRequestCoordinator::new(&fast_config(), credentials, provider)
}

fn request(prefix: &str, suffix: &str) -> CompletionRequest {
    CompletionRequest {
        completion_id: new_completion_id(),
        language_id: "rust".into(),
        prompt: PromptOptions {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            file_path: "src/main.rs".into(),
            context_snippets: Vec::new(),
        },
        hide_score: HideScoreInputs {
            is_whitespace_after_cursor: true,
            document_length: prefix.len() + suffix.len(),
            prompt_end_pos: prefix.len(),
            previous_label: 0,
            previous_label_timestamp: 0,
        },
    }
}

// ─── Cache reuse ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn exact_cache_hit_issues_no_network_call() {
    let provider = MockProvider::returning("should-not-be-used");
    let coordinator = build_coordinator(Arc::new(StaticCredentials), provider.clone());

    coordinator.cache().lock().unwrap().update(CachedSuggestion {
        text: "foo()".into(),
        prefix: "x=".into(),
        suffix: "".into(),
        completion_id: "01A".into(),
    });

    let outcome = coordinator
        .provide(request("x=", ""), None)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.text, "foo()");
    assert!(outcome.cache_hit);
    assert_eq!(provider.calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn partially_typed_suggestion_returns_remainder() {
    let provider = MockProvider::returning("unused");
    let coordinator = build_coordinator(Arc::new(StaticCredentials), provider.clone());

    coordinator.cache().lock().unwrap().update(CachedSuggestion {
        text: "foo()".into(),
        prefix: "x=".into(),
        suffix: "".into(),
        completion_id: "01A".into(),
    });

    // The user typed "fo" of the suggestion since it was cached.
    let outcome = coordinator
        .provide(request("x=fo", ""), None)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.text, "o()");
    assert_eq!(provider.calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn miss_fetches_once_and_populates_history() {
    let provider = MockProvider::returning("bar()");
    let coordinator = build_coordinator(Arc::new(StaticCredentials), provider.clone());

    let outcome = coordinator
        .provide(request("y=", ""), None)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.text, "bar()");
    assert!(!outcome.cache_hit);
    assert_eq!(provider.calls.load(Ordering::Relaxed), 1);

    // The same context is now served from history.
    let outcome = coordinator
        .provide(request("y=", ""), None)
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.cache_hit);
    assert_eq!(provider.calls.load(Ordering::Relaxed), 1);
}

// ─── Credentials / cancellation ───────────────────────────────────────────────

#[tokio::test]
async fn missing_credentials_fail_open_with_no_network_call() {
    let provider = MockProvider::returning("unused");
    let coordinator = build_coordinator(Arc::new(NoCredentials), provider.clone());

    let outcome = coordinator.provide(request("x=", ""), None).await.unwrap();
    assert!(outcome.is_none());
    assert_eq!(provider.calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn pre_cancelled_request_skips_everything() {
    let provider = MockProvider::returning("unused");
    let coordinator = build_coordinator(Arc::new(StaticCredentials), provider.clone());

    let token = CancellationToken::new();
    token.cancel();

    let outcome = coordinator
        .provide(request("x=", ""), Some(token))
        .await
        .unwrap();
    assert!(outcome.is_none());
    assert_eq!(provider.calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn cancellation_after_fetch_returns_nothing_but_still_caches() {
    let token = CancellationToken::new();
    let provider = Arc::new(MockProvider {
        response: Some("net()".into()),
        calls: AtomicU32::new(0),
        cancel_on_return: Some(token.clone()),
    });
    let coordinator = build_coordinator(Arc::new(StaticCredentials), provider.clone());

    let outcome = coordinator
        .provide(request("z=", ""), Some(token))
        .await
        .unwrap();

    // The result is suppressed...
    assert!(outcome.is_none());
    assert_eq!(provider.calls.load(Ordering::Relaxed), 1);

    // ...but the fetched suggestion still landed in history for later reuse.
    let cached = coordinator
        .cache()
        .lock()
        .unwrap()
        .find_matching("z=", "")
        .unwrap();
    assert_eq!(cached.0, "net()");
}

#[tokio::test]
async fn new_request_supersedes_tracked_in_flight_tokens() {
    let provider = MockProvider::returning("a");
    let coordinator = build_coordinator(Arc::new(StaticCredentials), provider.clone());

    let stale = coordinator.registry().register("stale-request");
    let _ = coordinator.provide(request("x=", ""), None).await.unwrap();

    assert!(stale.is_cancelled());
}

// ─── Garbled output ───────────────────────────────────────────────────────────

#[tokio::test]
async fn replacement_chars_are_stripped_before_caching_and_returning() {
    let provider = MockProvider::returning("café\u{FFFD}");
    let coordinator = build_coordinator(Arc::new(StaticCredentials), provider.clone());

    let outcome = coordinator
        .provide(request("drink=", ""), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.text, "café");

    let cached = coordinator
        .cache()
        .lock()
        .unwrap()
        .find_matching("drink=", "")
        .unwrap();
    assert_eq!(cached.0, "café");
}

// ─── Acceptance flow ──────────────────────────────────────────────────────────

#[tokio::test]
async fn shown_suggestion_is_confirmed_accepted_after_matching_edit() {
    let provider = MockProvider::returning("hello");
    let coordinator = build_coordinator(Arc::new(StaticCredentials), provider.clone());
    let tracker = AcceptanceTracker::new();

    let outcome = coordinator
        .provide(request("", ""), None)
        .await
        .unwrap()
        .unwrap();

    // The suggestion is shown as ghost text at (0,0) of an empty document.
    let shown_in = DocumentState {
        uri: "file:///a.rs".into(),
        version: 4,
        text: String::new(),
    };
    tracker.set_expected(&shown_in, &outcome.text, Position::new(0, 0), &outcome.completion_id);

    // The user accepts: the document advances one version and now carries
    // exactly the predicted text, cursor at the predicted end.
    let edited = DocumentState {
        uri: "file:///a.rs".into(),
        version: 5,
        text: "hello".into(),
    };
    assert!(tracker.check_accepted(&edited, Position::new(0, 5)));
    // At-most-once: the expectation is consumed.
    assert!(!tracker.check_accepted(&edited, Position::new(0, 5)));

    let (label, _) = tracker.previous_outcome();
    assert_eq!(label, 1);
}

#[tokio::test]
async fn pending_suggestion_is_rejected_before_showing_the_next_one() {
    let tracker = AcceptanceTracker::new();
    let doc = DocumentState {
        uri: "file:///a.rs".into(),
        version: 1,
        text: String::new(),
    };

    tracker.set_expected(&doc, "first", Position::new(0, 0), "01A");

    // A new completion is about to be shown while 01A is still pending:
    // the caller records the rejection before overwriting.
    if let Some(pending) = tracker.pending_completion_id() {
        tracker.record_rejection(&pending);
    }
    tracker.set_expected(&doc, "second", Position::new(0, 0), "01B");

    let (label, _) = tracker.previous_outcome();
    assert_eq!(label, 0);
    assert_eq!(tracker.pending_completion_id().unwrap(), "01B");
}
