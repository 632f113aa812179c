// SPDX-License-Identifier: MIT
//! Acceptance tracking for shown suggestions.
//!
//! When ghost text is shown, the editor gives no direct "accepted" signal;
//! acceptance is inferred from the next document edit. The tracker holds at
//! most one pending expectation (Idle ⇄ Pending) and confirms it when a later
//! edit lands exactly the predicted text at the predicted range.
//!
//! Constructed once per session and injected; never a global static.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// Zero-based line/character position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// Snapshot of an editor document: identity, monotonic version, full text.
#[derive(Debug, Clone)]
pub struct DocumentState {
    pub uri: String,
    pub version: i32,
    pub text: String,
}

impl DocumentState {
    /// Literal text between two positions, or None when the range falls
    /// outside the document.
    pub fn text_in_range(&self, start: Position, end: Position) -> Option<String> {
        let lines: Vec<&str> = self.text.split('\n').collect();
        let start_line = start.line as usize;
        let end_line = end.line as usize;
        if start_line >= lines.len() || end_line >= lines.len() {
            return None;
        }

        let char_offset = |line: &str, character: u32| -> Option<usize> {
            if character as usize == line.chars().count() {
                return Some(line.len());
            }
            line.char_indices().nth(character as usize).map(|(i, _)| i)
        };

        if start_line == end_line {
            let line = lines[start_line];
            let s = char_offset(line, start.character)?;
            let e = char_offset(line, end.character)?;
            if s > e {
                return None;
            }
            return Some(line[s..e].to_string());
        }

        let mut out = String::new();
        let first = lines[start_line];
        out.push_str(&first[char_offset(first, start.character)?..]);
        for line in &lines[start_line + 1..end_line] {
            out.push('\n');
            out.push_str(line);
        }
        let last = lines[end_line];
        out.push('\n');
        out.push_str(&last[..char_offset(last, end.character)?]);
        Some(out)
    }
}

/// Predicted insertion of a shown suggestion.
#[derive(Debug, Clone)]
struct Expectation {
    uri: String,
    version: i32,
    text: String,
    start: Position,
    end: Position,
    completion_id: String,
}

#[derive(Debug, Clone, Copy)]
struct OutcomeRecord {
    accepted: bool,
    timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    pending: Option<Expectation>,
    last: Option<OutcomeRecord>,
}

/// Tracks whether shown ghost text was accepted, rejected, or is still pending.
#[derive(Default)]
pub struct AcceptanceTracker {
    inner: Mutex<Inner>,
}

impl AcceptanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `text` was just shown at `start` in `document`.
    ///
    /// Computes the predicted end position from the line count of `text` and
    /// overwrites any prior pending expectation (at most one outstanding).
    pub fn set_expected(
        &self,
        document: &DocumentState,
        text: &str,
        start: Position,
        completion_id: &str,
    ) {
        let end = predicted_end(start, text);
        let mut inner = self.inner.lock().expect("acceptance tracker poisoned");
        inner.pending = Some(Expectation {
            uri: document.uri.clone(),
            version: document.version,
            text: text.to_string(),
            start,
            end,
            completion_id: completion_id.to_string(),
        });
    }

    /// Check a document-change event against the pending expectation.
    ///
    /// Acceptance is confirmed iff: same document, version strictly greater
    /// than when the expectation was set, cursor at the predicted end, and the
    /// literal text in the predicted range equals the expected text. Confirms
    /// at most once; the expectation is cleared as a side effect.
    pub fn check_accepted(&self, document: &DocumentState, cursor: Position) -> bool {
        let mut inner = self.inner.lock().expect("acceptance tracker poisoned");
        let Some(exp) = inner.pending.as_ref() else {
            return false;
        };

        let confirmed = exp.uri == document.uri
            && document.version > exp.version
            && cursor == exp.end
            && document
                .text_in_range(exp.start, exp.end)
                .is_some_and(|actual| actual == exp.text);

        if confirmed {
            debug!(completion_id = %exp.completion_id, "suggestion accepted");
            inner.pending = None;
            inner.last = Some(OutcomeRecord {
                accepted: true,
                timestamp: Utc::now(),
            });
        }
        confirmed
    }

    /// Record a rejection for `completion_id` and clear any pending
    /// expectation. Callers invoke this before showing a new suggestion while
    /// an old one is still unconfirmed.
    pub fn record_rejection(&self, completion_id: &str) {
        debug!(completion_id = %completion_id, "suggestion rejected");
        let mut inner = self.inner.lock().expect("acceptance tracker poisoned");
        inner.pending = None;
        inner.last = Some(OutcomeRecord {
            accepted: false,
            timestamp: Utc::now(),
        });
    }

    /// Completion id of the still-pending expectation, if any.
    pub fn pending_completion_id(&self) -> Option<String> {
        self.inner
            .lock()
            .expect("acceptance tracker poisoned")
            .pending
            .as_ref()
            .map(|e| e.completion_id.clone())
    }

    /// Last-outcome feature pair for the next request's heuristic bundle:
    /// `(label, timestamp)` where label is 1 accepted / 0 rejected.
    ///
    /// With no history the timestamp defaults to one hour ago so cold starts
    /// are not biased toward "just happened".
    pub fn previous_outcome(&self) -> (i32, DateTime<Utc>) {
        let inner = self.inner.lock().expect("acceptance tracker poisoned");
        match &inner.last {
            Some(rec) => (i32::from(rec.accepted), rec.timestamp),
            None => (0, Utc::now() - Duration::hours(1)),
        }
    }
}

/// End position of `text` inserted at `start`.
fn predicted_end(start: Position, text: &str) -> Position {
    let lines: Vec<&str> = text.split('\n').collect();
    let last_len = lines.last().map_or(0, |l| l.chars().count()) as u32;
    if lines.len() == 1 {
        Position::new(start.line, start.character + last_len)
    } else {
        Position::new(start.line + (lines.len() as u32 - 1), last_len)
    }
}
