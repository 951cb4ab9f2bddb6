#![deny(missing_docs)]
//! Throttled incremental text streamer.
//!
//! [`ThrottledStreamer`] caches the reasoning/content text of an
//! in-progress planning block and, on [`ThrottledStreamer::update`],
//! computes the smallest delta needed to bring a subscriber's view up
//! to date: an `Append` when the new text extends the old one, or a
//! `Replace` when it doesn't (the model revised earlier text, which a
//! pure suffix diff can't express). Updates within a ~120ms window of
//! the last flush are coalesced; [`ThrottledStreamer::complete`] always
//! flushes regardless of the window.
//!
//! No timer or background task here — time is supplied by the caller
//! (epoch milliseconds) so the streamer stays synchronous and testable
//! without a runtime.

/// Which cached field a delta applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// The reasoning trace.
    Reasoning,
    /// The rendered content/assistant text.
    Content,
}

/// The shape of a single incremental update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaKind {
    /// `text` is the suffix newly appended since the last emission.
    Append(String),
    /// The new text was not a prefix-extension of the old one; `text`
    /// is the full replacement value.
    Replace(String),
}

/// One emitted delta, ready to be wrapped in a `block.delta.artifact`
/// event by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDelta {
    /// The block this delta applies to.
    pub block_id: String,
    /// Which field changed.
    pub field: Field,
    /// The delta itself.
    pub kind: DeltaKind,
}

/// The throttle window, in milliseconds.
pub const THROTTLE_WINDOW_MS: i64 = 120;

/// Per-block incremental text streamer.
#[derive(Debug, Default)]
pub struct ThrottledStreamer {
    block_id: Option<String>,
    last_reasoning: String,
    last_content: String,
    last_flush_at: Option<i64>,
}

impl ThrottledStreamer {
    /// Create a streamer with no block bound yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind (or rebind) the streamer to a materialized block. Cached
    /// text is preserved so the next `update` diffs against it rather
    /// than re-emitting everything from scratch.
    pub fn set_block(&mut self, block_id: impl Into<String>) {
        self.block_id = Some(block_id.into());
    }

    /// Whether a block has been bound yet.
    pub fn is_bound(&self) -> bool {
        self.block_id.is_some()
    }

    fn diff(field: Field, block_id: &str, old: &str, new: &str) -> Option<TextDelta> {
        if old == new {
            return None;
        }
        let kind = if let Some(suffix) = new.strip_prefix(old) {
            if suffix.is_empty() {
                return None;
            }
            DeltaKind::Append(suffix.to_string())
        } else {
            DeltaKind::Replace(new.to_string())
        };
        Some(TextDelta {
            block_id: block_id.to_string(),
            field,
            kind,
        })
    }

    /// Update the cached text. Without a bound block, this only
    /// updates the cache and never emits (there's nowhere to attribute
    /// the delta yet). Within `THROTTLE_WINDOW_MS` of the last flush,
    /// the update is absorbed into the cache but not emitted; the next
    /// `update` or `complete` past the window (or a forced `complete`)
    /// will emit the cumulative delta.
    pub fn update(&mut self, new_reasoning: &str, new_content: &str, now: i64) -> Vec<TextDelta> {
        let Some(block_id) = self.block_id.clone() else {
            self.last_reasoning = new_reasoning.to_string();
            self.last_content = new_content.to_string();
            return Vec::new();
        };

        let due = match self.last_flush_at {
            None => true,
            Some(last) => now - last >= THROTTLE_WINDOW_MS,
        };
        if !due {
            return Vec::new();
        }
        self.flush_to(&block_id, new_reasoning, new_content, now)
    }

    /// Force a flush regardless of the throttle window. Always called
    /// once a block finishes streaming so the final text is never lost
    /// inside an un-elapsed window.
    pub fn complete(&mut self, final_reasoning: &str, final_content: &str, now: i64) -> Vec<TextDelta> {
        let Some(block_id) = self.block_id.clone() else {
            self.last_reasoning = final_reasoning.to_string();
            self.last_content = final_content.to_string();
            return Vec::new();
        };
        self.flush_to(&block_id, final_reasoning, final_content, now)
    }

    fn flush_to(&mut self, block_id: &str, reasoning: &str, content: &str, now: i64) -> Vec<TextDelta> {
        let mut deltas = Vec::new();
        if let Some(d) = Self::diff(Field::Reasoning, block_id, &self.last_reasoning, reasoning) {
            deltas.push(d);
        }
        if let Some(d) = Self::diff(Field::Content, block_id, &self.last_content, content) {
            deltas.push(d);
        }
        self.last_reasoning = reasoning.to_string();
        self.last_content = content.to_string();
        self.last_flush_at = Some(now);
        deltas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbound_streamer_caches_but_never_emits() {
        let mut s = ThrottledStreamer::new();
        let deltas = s.update("thinking", "", 0);
        assert!(deltas.is_empty());
        assert!(!s.is_bound());
    }

    #[test]
    fn first_update_after_binding_emits_full_text_as_append() {
        let mut s = ThrottledStreamer::new();
        s.update("thinking", "", 0);
        s.set_block("block-1");
        let deltas = s.update("thinking more", "hello", 1000);
        assert_eq!(deltas.len(), 2);
        assert!(deltas.iter().any(|d| matches!(&d.kind, DeltaKind::Append(s) if s == " more")));
        assert!(deltas.iter().any(|d| matches!(&d.kind, DeltaKind::Append(s) if s == "hello")));
    }

    #[test]
    fn updates_within_window_are_coalesced() {
        let mut s = ThrottledStreamer::new();
        s.set_block("block-1");
        s.update("a", "", 0);
        let deltas = s.update("ab", "", 50);
        assert!(deltas.is_empty(), "within throttle window, should not emit yet");
        let deltas = s.update("abc", "", 200);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].kind, DeltaKind::Append("bc".to_string()));
    }

    #[test]
    fn non_prefix_change_emits_replace() {
        let mut s = ThrottledStreamer::new();
        s.set_block("block-1");
        s.update("draft one", "", 0);
        let deltas = s.update("revised answer", "", 200);
        assert_eq!(deltas.len(), 1);
        assert_eq!(
            deltas[0].kind,
            DeltaKind::Replace("revised answer".to_string())
        );
    }

    #[test]
    fn complete_always_flushes_even_inside_window() {
        let mut s = ThrottledStreamer::new();
        s.set_block("block-1");
        s.update("partial", "", 0);
        let deltas = s.complete("partial final", "done", 10);
        assert_eq!(deltas.len(), 2);
    }

    #[test]
    fn concatenation_of_deltas_equals_final_text() {
        let mut s = ThrottledStreamer::new();
        s.set_block("block-1");
        let mut accumulated = String::new();
        let mut t = 0;
        for chunk in ["Step ", "one. ", "Step two."] {
            t += 200;
            accumulated.push_str(chunk);
            for d in s.update(&accumulated, "", t) {
                match d.kind {
                    DeltaKind::Append(suffix) => {
                        assert!(d.field == Field::Reasoning);
                        let _ = suffix;
                    }
                    DeltaKind::Replace(_) => panic!("unexpected replace in append-only test"),
                }
            }
        }
        let final_deltas = s.complete(&accumulated, "", t + 200);
        // No further change beyond what update() already captured.
        assert!(final_deltas.is_empty() || matches!(&final_deltas[0].kind, DeltaKind::Append(_)));
        assert_eq!(s.last_reasoning, accumulated);
    }
}
