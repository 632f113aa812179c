// SPDX-License-Identifier: MIT
//! Provider and credential seams for the completion pipeline.
//!
//! The coordinator never talks HTTP directly: it resolves credentials
//! through [`CredentialStore`] and fetches through [`CompletionProvider`], so
//! tests can substitute both.

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::CompletionConfig;
use crate::error::{Error, Result};

use super::model::CompletionRequest;

/// Credentials handed out by the host extension's auth layer.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub id: String,
    pub name: String,
    pub access_token: String,
    pub machine_id: String,
    pub base_url: String,
}

/// Resolves the active Costrict credentials, if any.
///
/// `None` means the feature is simply unavailable (signed out or a different
/// provider is active); callers fail open, they do not error.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn resolve(&self) -> Option<Credentials>;
}

/// Fetches one completion from the backend.
///
/// Implementations must race the request against `token` and return
/// [`Error::Cancelled`] when the token fires first.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn fetch(
        &self,
        credentials: &Credentials,
        request: &CompletionRequest,
        token: &CancellationToken,
    ) -> Result<Option<String>>;
}

// ─── HTTP provider ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponseBody {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

/// OpenAI-compatible `/completions` provider.
pub struct HttpCompletionProvider {
    http: reqwest::Client,
    config: CompletionConfig,
}

impl HttpCompletionProvider {
    pub fn new(config: CompletionConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    /// Clip prefix from the right so the newest context survives.
    fn clip_prefix<'a>(&self, prefix: &'a str) -> &'a str {
        clip_tail(prefix, self.config.max_prefix_chars)
    }

    /// Clip suffix from the left so the nearest context survives.
    fn clip_suffix<'a>(&self, suffix: &'a str) -> &'a str {
        clip_head(suffix, self.config.max_suffix_chars)
    }
}

#[async_trait]
impl CompletionProvider for HttpCompletionProvider {
    async fn fetch(
        &self,
        credentials: &Credentials,
        request: &CompletionRequest,
        token: &CancellationToken,
    ) -> Result<Option<String>> {
        let url = format!("{}/v1/completions", credentials.base_url);
        let body = serde_json::json!({
            "model": "costrict-completion",
            "prompt": self.clip_prefix(&request.prompt.prefix),
            "suffix": self.clip_suffix(&request.prompt.suffix),
            "stream": false,
            "languageId": request.language_id,
            "completionId": request.completion_id,
            "hideScore": request.hide_score,
        });

        let send = self
            .http
            .post(&url)
            .bearer_auth(&credentials.access_token)
            .header("X-Request-ID", uuid::Uuid::new_v4().to_string())
            .header("X-Costrict-Client-Id", &credentials.id)
            .json(&body)
            .send();

        let response = tokio::select! {
            _ = token.cancelled() => return Err(Error::Cancelled),
            resp = send => resp?,
        };

        if !response.status().is_success() {
            return Err(Error::RemoteStatus {
                status: response.status().as_u16(),
                url,
            });
        }

        let parse = response.json::<CompletionResponseBody>();
        let body = tokio::select! {
            _ = token.cancelled() => return Err(Error::Cancelled),
            parsed = parse => parsed?,
        };

        let text = body.choices.into_iter().next().map(|c| c.text);
        debug!(
            completion_id = %request.completion_id,
            returned = text.is_some(),
            "completion fetch finished"
        );
        Ok(text.filter(|t| !t.is_empty()))
    }
}

/// Last `max` bytes of `s`, snapped to a char boundary.
fn clip_tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// First `max` bytes of `s`, snapped to a char boundary.
fn clip_head(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
