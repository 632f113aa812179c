// SPDX-License-Identifier: MIT
// Suggestion history cache.
//
// A bounded, ordered list of recently returned completions, matched against
// the current (prefix, suffix) so a keystroke can reuse an earlier result
// instead of going back to the network.
//
// Eviction is FIFO by insertion order, not LRU by access: a reused entry
// does not get its lifetime extended.

use std::collections::VecDeque;

/// One remembered completion result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSuggestion {
    pub text: String,
    pub prefix: String,
    pub suffix: String,
    pub completion_id: String,
}

/// Bounded suggestion history.
///
/// Thread-safety: wrap in `Mutex<SuggestionCache>` for shared use.
pub struct SuggestionCache {
    capacity: usize,
    /// Insertion order = recency (front = oldest, back = newest).
    entries: VecDeque<CachedSuggestion>,
    pub hits: u64,
    pub misses: u64,
}

impl SuggestionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Append a suggestion, de-duplicated by exact (text, prefix, suffix)
    /// match. Evicts the oldest entry on overflow.
    pub fn update(&mut self, suggestion: CachedSuggestion) {
        let duplicate = self.entries.iter().any(|e| {
            e.text == suggestion.text
                && e.prefix == suggestion.prefix
                && e.suffix == suggestion.suffix
        });
        if duplicate {
            return;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(suggestion);
    }

    /// Find a cached suggestion usable at the current cursor context.
    ///
    /// Two rules, scanned newest-first:
    /// - exact (prefix, suffix) match → the cached text verbatim;
    /// - typed-ahead match: the current prefix extends the cached prefix by
    ///   text that is itself a proper prefix of the cached suggestion (the
    ///   user has started typing it) → the untyped remainder.
    ///
    /// The typed-ahead rule assumes forward typing; an unrelated suggestion
    /// sharing a prefix can still match. Newest-first scanning keeps the
    /// freshest candidate ahead of stale ones.
    ///
    /// Returns `(text, completion_id)` of the matched entry.
    pub fn find_matching(&mut self, prefix: &str, suffix: &str) -> Option<(String, String)> {
        for entry in self.entries.iter().rev() {
            if entry.prefix == prefix && entry.suffix == suffix {
                self.hits += 1;
                return Some((entry.text.clone(), entry.completion_id.clone()));
            }
            if entry.suffix == suffix
                && prefix.len() > entry.prefix.len()
                && prefix.starts_with(&entry.prefix)
            {
                let typed = &prefix[entry.prefix.len()..];
                if typed.len() < entry.text.len() && entry.text.starts_with(typed) {
                    self.hits += 1;
                    return Some((
                        entry.text[typed.len()..].to_string(),
                        entry.completion_id.clone(),
                    ));
                }
            }
        }
        self.misses += 1;
        None
    }

    /// Hit rate as a value 0.0–1.0. Returns 0.0 if no lookups yet.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest entry, if any (eviction-order inspection for tests/diagnostics).
    pub fn oldest(&self) -> Option<&CachedSuggestion> {
        self.entries.front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(text: &str, prefix: &str, suffix: &str) -> CachedSuggestion {
        CachedSuggestion {
            text: text.to_string(),
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            completion_id: format!("id-{text}"),
        }
    }

    #[test]
    fn exact_match_returns_full_text() {
        let mut cache = SuggestionCache::new(20);
        cache.update(entry("foo()", "x=", ""));

        let (text, id) = cache.find_matching("x=", "").unwrap();
        assert_eq!(text, "foo()");
        assert_eq!(id, "id-foo()");
        assert_eq!(cache.hits, 1);
    }

    #[test]
    fn typed_ahead_returns_remainder() {
        let mut cache = SuggestionCache::new(20);
        cache.update(entry("foo()", "x=", ""));

        // User typed "fo" of the suggestion.
        let (text, _) = cache.find_matching("x=fo", "").unwrap();
        assert_eq!(text, "o()");
    }

    #[test]
    fn fully_typed_suggestion_no_longer_matches() {
        let mut cache = SuggestionCache::new(20);
        cache.update(entry("foo()", "x=", ""));

        // The whole suggestion is typed, nothing left to offer.
        assert!(cache.find_matching("x=foo()", "").is_none());
    }

    #[test]
    fn diverging_typing_does_not_match() {
        let mut cache = SuggestionCache::new(20);
        cache.update(entry("foo()", "x=", ""));

        assert!(cache.find_matching("x=ba", "").is_none());
        assert_eq!(cache.misses, 1);
    }

    #[test]
    fn suffix_change_breaks_the_match() {
        let mut cache = SuggestionCache::new(20);
        cache.update(entry("foo()", "x=", ";"));

        assert!(cache.find_matching("x=", "").is_none());
    }

    #[test]
    fn bounded_to_capacity_with_fifo_eviction() {
        let mut cache = SuggestionCache::new(20);
        for i in 0..21 {
            cache.update(entry(&format!("text{i}"), &format!("p{i}"), ""));
        }
        assert_eq!(cache.len(), 20);
        // The oldest (index 0) was evicted; index 1 is now the oldest.
        assert_eq!(cache.oldest().unwrap().text, "text1");
        assert!(cache.find_matching("p0", "").is_none());
        assert!(cache.find_matching("p20", "").is_some());
    }

    #[test]
    fn duplicate_triples_are_not_appended() {
        let mut cache = SuggestionCache::new(20);
        cache.update(entry("foo()", "x=", ""));
        cache.update(entry("foo()", "x=", ""));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn newest_entry_wins_among_prefix_sharing_candidates() {
        let mut cache = SuggestionCache::new(20);
        cache.update(entry("foo_old()", "x=", ""));
        cache.update(entry("foo_new()", "x=", ""));

        let (text, _) = cache.find_matching("x=foo_", "").unwrap();
        assert_eq!(text, "new()");
    }
}
