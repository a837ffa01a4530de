//! Canonical text normalization and content fingerprinting.
//!
//! The canonical text is the single addressing space for all scene/chunk
//! offsets, so normalization must be deterministic: byte-identical canonical
//! text yields byte-identical fingerprints on every platform and run.

use sha2::{Digest, Sha256};

/// Result of normalizing raw extracted text.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub text: String,
    pub fingerprint: String,
    pub char_count: usize,
}

/// Normalize extracted text into its canonical form.
///
/// Rules, applied in order:
/// 1. CRLF / lone CR become LF, NUL bytes are dropped
/// 2. Curly quotes become their ASCII equivalents, NBSP becomes a space
/// 3. Trailing whitespace is stripped per line
/// 4. Exactly one trailing newline (empty input stays empty)
pub fn normalize(raw: &str) -> Normalized {
    let mut unified = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                unified.push('\n');
            }
            '\0' => {}
            '\u{2018}' | '\u{2019}' | '\u{201A}' => unified.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' => unified.push('"'),
            '\u{00A0}' => unified.push(' '),
            other => unified.push(other),
        }
    }

    let mut text = String::with_capacity(unified.len());
    for line in unified.split('\n') {
        text.push_str(line.trim_end());
        text.push('\n');
    }
    // split('\n') yields one extra empty segment after a trailing newline;
    // collapse whatever accumulated into exactly one terminator.
    let trimmed = text.trim_end_matches('\n');
    let text = if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    };

    let fingerprint = fingerprint_text(&text);
    let char_count = text.chars().count();
    Normalized {
        text,
        fingerprint,
        char_count,
    }
}

/// SHA-256 hex digest of a text's UTF-8 bytes.
///
/// Shared by the document-level fingerprint and per-chunk fingerprints.
pub fn fingerprint_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Slice a string by character (Unicode scalar) offsets.
///
/// Callers must pass `start <= end <= char_count`; offsets beyond the end
/// clamp to the end of the text.
pub fn slice_by_chars(text: &str, start: usize, end: usize) -> &str {
    let byte_start = byte_offset(text, start);
    let byte_end = byte_offset(text, end);
    &text[byte_start..byte_end.max(byte_start)]
}

fn byte_offset(text: &str, char_idx: usize) -> usize {
    text.char_indices()
        .nth(char_idx)
        .map(|(b, _)| b)
        .unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_endings_unified() {
        let norm = normalize("one\r\ntwo\rthree\n");
        assert_eq!(norm.text, "one\ntwo\nthree\n");
    }

    #[test]
    fn test_smart_quotes_replaced() {
        let norm = normalize("\u{201C}Hello,\u{201D} she said. It\u{2019}s fine.");
        assert_eq!(norm.text, "\"Hello,\" she said. It's fine.\n");
    }

    #[test]
    fn test_trailing_whitespace_stripped() {
        let norm = normalize("line one   \nline two\t\n");
        assert_eq!(norm.text, "line one\nline two\n");
    }

    #[test]
    fn test_exactly_one_trailing_newline() {
        assert_eq!(normalize("abc").text, "abc\n");
        assert_eq!(normalize("abc\n").text, "abc\n");
        assert_eq!(normalize("abc\n\n\n").text, "abc\n");
    }

    #[test]
    fn test_interior_blank_lines_preserved() {
        let norm = normalize("one\n\n\ntwo");
        assert_eq!(norm.text, "one\n\n\ntwo\n");
    }

    #[test]
    fn test_empty_input_stays_empty() {
        let norm = normalize("");
        assert_eq!(norm.text, "");
        assert_eq!(norm.char_count, 0);
    }

    #[test]
    fn test_nul_bytes_dropped() {
        let norm = normalize("a\0b");
        assert_eq!(norm.text, "ab\n");
    }

    #[test]
    fn test_fingerprint_stable_across_source_line_endings() {
        let a = normalize("one\r\ntwo\r\n");
        let b = normalize("one\ntwo\n");
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.text, b.text);
    }

    #[test]
    fn test_fingerprint_differs_for_distinct_content() {
        assert_ne!(normalize("one").fingerprint, normalize("two").fingerprint);
    }

    #[test]
    fn test_char_count_uses_chars_not_bytes() {
        let norm = normalize("héllo");
        assert_eq!(norm.char_count, 6); // 5 letters + newline
        assert!(norm.text.len() > norm.char_count - 1);
    }

    #[test]
    fn test_slice_by_chars_multibyte() {
        let text = "héllo wörld";
        assert_eq!(slice_by_chars(text, 0, 5), "héllo");
        assert_eq!(slice_by_chars(text, 6, 11), "wörld");
        assert_eq!(slice_by_chars(text, 0, 100), text);
    }
}
