//! Numeric-aware ordering for fragment identifiers.
//!
//! Imported fragments are named after their draw call index (`"0"`, `"1"`,
//! ..., `"10"`), sometimes with a host-assigned duplicate suffix such as
//! `".001"`. Plain string ordering would put `"10"` before `"2"`, so every
//! place that orders fragments before merging or renaming goes through
//! [`natural_sort_key`].

use std::cmp::Ordering;

/// One segment of a natural sort key.
///
/// Keys always alternate text and number segments starting with text (which
/// may be empty), so two keys compare segment-wise without ever comparing a
/// `Text` against a `Number` at the same position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeySegment {
    Text(String),
    Number(NumericRun),
}

/// A run of ASCII digits compared by integer value.
///
/// Stored without leading zeros so arbitrarily long runs compare correctly
/// without overflowing a fixed-width integer: a shorter run is a smaller
/// number, equal-length runs compare lexicographically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumericRun(String);

impl NumericRun {
    fn new(digits: &str) -> Self {
        let trimmed = digits.trim_start_matches('0');
        Self(trimmed.to_string())
    }
}

impl Ord for NumericRun {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for NumericRun {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Split `s` into alternating text / number segments.
///
/// ```
/// use s2maps::natural::natural_sort_key;
/// assert!(natural_sort_key("frag2") < natural_sort_key("frag10"));
/// ```
pub fn natural_sort_key(s: &str) -> Vec<KeySegment> {
    let mut key = Vec::new();
    let mut rest = s;

    loop {
        let text_end = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        key.push(KeySegment::Text(rest[..text_end].to_string()));
        rest = &rest[text_end..];
        if rest.is_empty() {
            break;
        }

        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        key.push(KeySegment::Number(NumericRun::new(&rest[..digits_end])));
        rest = &rest[digits_end..];
    }

    key
}

/// Compare two identifiers by their natural sort keys.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_sort_key(a).cmp(&natural_sort_key(b))
}
