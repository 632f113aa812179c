// SPDX-License-Identifier: MIT
//! Completion request/response types.

use serde::Serialize;

/// Generate a fresh time-sortable completion id.
pub fn new_completion_id() -> String {
    ulid::Ulid::new().to_string()
}

/// Prompt context extracted from the editor at the cursor.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptOptions {
    /// Text immediately before the cursor.
    pub prefix: String,
    /// Text immediately after the cursor.
    pub suffix: String,
    /// Workspace-relative path of the file being edited.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_path: String,
    /// Surrounding-file context snippets (imports, sibling definitions).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_snippets: Vec<String>,
}

/// Heuristic signal bundle sent alongside the prompt; the backend uses it to
/// decide whether a suggestion is worth showing at all.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HideScoreInputs {
    /// True when only whitespace follows the cursor on its line.
    pub is_whitespace_after_cursor: bool,
    /// Total document length in characters.
    pub document_length: usize,
    /// Cursor offset from the start of the document.
    pub prompt_end_pos: usize,
    /// Outcome of the previous suggestion: 1 accepted, 0 rejected.
    pub previous_label: i32,
    /// Unix millis of the previous outcome (one hour ago when no history,
    /// so cold starts are not biased toward "just happened").
    pub previous_label_timestamp: i64,
}

/// One keystroke-triggered completion attempt. Ephemeral: discarded once
/// resolved, cancelled, or superseded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    /// Opaque, time-sortable, caller-generated.
    pub completion_id: String,
    pub language_id: String,
    pub prompt: PromptOptions,
    pub hide_score: HideScoreInputs,
}

/// What the pipeline hands back to the editor integration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionOutcome {
    pub text: String,
    pub completion_id: String,
    /// True when the text came from the suggestion history without a network
    /// round-trip.
    pub cache_hit: bool,
}

/// Strip UTF-8 replacement characters from provider output.
///
/// A trailing U+FFFD indicates a multi-byte character truncated at a token
/// boundary; such bytes must never reach the cache or the editor.
pub fn strip_replacement_chars(text: &str) -> String {
    if text.contains('\u{FFFD}') {
        text.chars().filter(|c| *c != '\u{FFFD}').collect()
    } else {
        text.to_string()
    }
}
