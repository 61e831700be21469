//! Live-stream recognizer for a single fixed byte pattern.

/// Stateful matcher reporting whether the byte stream fed so far currently
/// ends with the target pattern.
///
/// On a mismatch the cursor restarts, re-checking only the current byte as a
/// candidate first byte of the pattern. Earlier bytes are never re-examined:
/// `"AB"` fed `"AAB"` matches at the final `B`, while `"AAB"` fed `"AAAB"`
/// misses the occurrence a full suffix automaton would catch.
pub struct SequenceMatcher<'p> {
    pattern: &'p [u8],

    /// Length of the pattern prefix matched by the most recent bytes
    matched: usize,
}

impl<'p> SequenceMatcher<'p> {
    pub fn new(pattern: &'p [u8]) -> Self {
        Self { pattern, matched: 0 }
    }

    /// Feeds one byte. Returns true exactly once per completed occurrence of
    /// the pattern, resetting the cursor afterwards.
    pub fn feed(&mut self, byte: u8) -> bool {
        if self.pattern.is_empty() {
            return false;
        }

        if self.pattern[self.matched] == byte {
            self.matched += 1;
        } else {
            self.matched = usize::from(self.pattern[0] == byte);
        }

        if self.matched == self.pattern.len() {
            self.matched = 0;
            return true;
        }

        false
    }

    /// Discards any partially matched prefix
    pub fn reset(&mut self) {
        self.matched = 0;
    }

    pub fn pattern(&self) -> &'p [u8] {
        self.pattern
    }
}
