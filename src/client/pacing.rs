//! Word-by-word reveal of a finished reply at a reading pace.

use std::ops::Range;
use std::time::Duration;

/// Splits `text` into maximal alternating runs of whitespace and non-whitespace.
/// The tokens always concatenate back to `text`.
pub fn tokenize(text: &str) -> Vec<&str> {
    token_ranges(text).into_iter().map(|r| &text[r]).collect()
}

/// Whitespace as a browser regex `\s` sees it: Unicode `White_Space` without
/// U+0085, plus the byte-order mark U+FEFF.
fn is_space(ch: char) -> bool {
    ch == '\u{feff}' || (ch.is_whitespace() && ch != '\u{85}')
}

fn token_ranges(text: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut in_space: Option<bool> = None;

    for (idx, ch) in text.char_indices() {
        let space = is_space(ch);
        match in_space {
            Some(current) if current != space => {
                ranges.push(start..idx);
                start = idx;
            }
            _ => {}
        }
        in_space = Some(space);
    }
    if start < text.len() {
        ranges.push(start..text.len());
    }
    ranges
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingProfile {
    /// Minimum pause after a word.
    pub floor: Duration,
    pub per_char: Duration,
    /// Pause after a whitespace run.
    pub whitespace: Duration,
}

impl Default for PacingProfile {
    fn default() -> Self {
        Self {
            floor: Duration::from_millis(60),
            per_char: Duration::from_millis(30),
            whitespace: Duration::from_millis(10),
        }
    }
}

impl PacingProfile {
    pub fn instant() -> Self {
        Self {
            floor: Duration::ZERO,
            per_char: Duration::ZERO,
            whitespace: Duration::ZERO,
        }
    }

    pub fn delay_for(&self, token: &str) -> Duration {
        if token.chars().all(is_space) {
            return self.whitespace;
        }
        let chars = token.chars().count() as u32;
        self.per_char.saturating_mul(chars).max(self.floor)
    }
}

/// Restartable generator over the pre-split tokens of one reply.
#[derive(Debug, Clone)]
pub struct Pacer {
    text: String,
    tokens: Vec<Range<usize>>,
    cursor: usize,
}

impl Pacer {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let tokens = token_ranges(&text);
        Self { text, tokens, cursor: 0 }
    }

    /// Next token to append, or `None` once the whole text has been revealed.
    pub fn advance(&mut self) -> Option<&str> {
        let range = self.tokens.get(self.cursor)?.clone();
        self.cursor += 1;
        Some(&self.text[range])
    }

    pub fn revealed(&self) -> &str {
        match self.cursor.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some(last) => &self.text[..last.end],
            None => "",
        }
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.tokens.len()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}
