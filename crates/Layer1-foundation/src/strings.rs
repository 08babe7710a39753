//! String helpers for user-visible messages

use std::borrow::Cow;

/// Maximum length of an error detail shown to a user
pub const MAX_DETAIL_CHARS: usize = 200;

/// Truncate to at most `max_chars` characters, never splitting a code point.
///
/// Borrows when no truncation is needed.
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => Cow::Owned(s[..idx].to_string()),
        None => Cow::Borrowed(s),
    }
}

/// Truncate an error detail for display
pub fn truncate_detail(s: &str) -> String {
    truncate_chars(s.trim(), MAX_DETAIL_CHARS).into_owned()
}
