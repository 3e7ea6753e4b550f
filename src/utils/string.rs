//! String utility functions for char-offset text manipulation
//!
//! Every offset in this crate counts Unicode scalar values (chars), the unit
//! the analysis backend reports. Byte slicing (`&s[a..b]`) is only done after
//! translating char offsets through these helpers.

use std::ops::Range;

/// Safely truncate a string at a character boundary, adding ellipsis if truncated.
///
/// Used for log previews of annotation text.
///
/// # Examples
/// ```
/// use marginalia_core::utils::string::truncate_at_char_boundary;
///
/// assert_eq!(truncate_at_char_boundary("hello world", 5), "hello...");
/// assert_eq!(truncate_at_char_boundary("hello", 10), "hello");
/// ```
pub fn truncate_at_char_boundary(s: &str, max_chars: usize) -> String {
    let char_count = s.chars().count();

    if char_count <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// Number of chars in `s`
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of the char at `char_idx`, or `s.len()` when past the end
pub fn byte_offset(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(byte, _)| byte)
        .unwrap_or(s.len())
}

/// Slice `s` by a char range, clamping both ends to the string length
pub fn char_slice(s: &str, range: Range<usize>) -> &str {
    let start = byte_offset(s, range.start);
    let end = byte_offset(s, range.end.max(range.start));
    &s[start..end]
}

/// Split `s` into (before, middle, after) at a char range
pub fn split_at_chars(s: &str, range: Range<usize>) -> (&str, &str, &str) {
    let start = byte_offset(s, range.start);
    let end = byte_offset(s, range.end.max(range.start));
    (&s[..start], &s[start..end], &s[end..])
}

/// Char offset of the first occurrence of `needle` in `haystack`
pub fn find_chars(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack
        .find(needle)
        .map(|byte| haystack[..byte].chars().count())
}
