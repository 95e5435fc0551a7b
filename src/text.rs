//! Small text and hashing helpers shared by extraction and ingestion.

use sha2::{Digest, Sha256};

/// Content-derived contract identifier: lowercase hex SHA-256 of the file.
pub fn content_id(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Lowercase hex SHA-256 of a string.
pub fn sha256_hex(text: &str) -> String {
    content_id(text.as_bytes())
}

fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r' | '\x0b' | '\x0c' | '\x1c' | '\x1d' | '\x1e' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

/// Split on every line boundary PDF text layers produce: `\n`, `\r\n`, bare
/// `\r`, vertical tab, form feed, the file/group/record separators, NEL and
/// the Unicode line and paragraph separators. A trailing break does not
/// produce an empty final line.
pub fn split_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if !is_line_break(c) {
            continue;
        }
        lines.push(&text[start..i]);
        let mut end = i + c.len_utf8();
        if c == '\r' {
            if let Some(&(_, '\n')) = chars.peek() {
                chars.next();
                end += 1;
            }
        }
        start = end;
    }
    if start < text.len() {
        lines.push(&text[start..]);
    }
    lines
}

/// Collapse whitespace runs inside each line to a single space and trim the
/// line, keeping the line structure intact.
pub fn normalize_whitespace_preserve_newlines(text: &str) -> String {
    split_lines(text)
        .into_iter()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Join words split by a soft hyphen at a line break.
pub fn dehyphenate(text: &str) -> String {
    text.replace("-\r\n", "")
        .replace("-\n", "")
        .replace("-\r", "")
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_id_is_sha256_hex() {
        let id = content_id(b"abc");
        assert_eq!(
            id,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(id.len(), 64);
    }

    #[test]
    fn normalize_keeps_lines() {
        let text = "  This   is\tline one  \n\n   line   two ";
        assert_eq!(
            normalize_whitespace_preserve_newlines(text),
            "This is line one\n\nline two"
        );
    }

    #[test]
    fn normalize_breaks_on_cr_and_form_feed() {
        assert_eq!(
            normalize_whitespace_preserve_newlines("Section 1\rTerm"),
            "Section 1\nTerm"
        );
        assert_eq!(
            normalize_whitespace_preserve_newlines("page one\x0cpage two"),
            "page one\npage two"
        );
        assert_eq!(
            normalize_whitespace_preserve_newlines("a\r\nb\u{2028}c\x1ed"),
            "a\nb\nc\nd"
        );
    }

    #[test]
    fn split_lines_drops_only_the_trailing_break() {
        assert_eq!(split_lines("a\n\nb\n"), vec!["a", "", "b"]);
        assert_eq!(split_lines("a\r\n\r\n"), vec!["a", ""]);
        assert!(split_lines("").is_empty());
    }

    #[test]
    fn dehyphenate_joins_split_words() {
        assert_eq!(dehyphenate("agree-\nment signed"), "agreement signed");
        assert_eq!(dehyphenate("agree-\r\nment"), "agreement");
        assert_eq!(dehyphenate("agree-\rment"), "agreement");
        assert_eq!(dehyphenate("well-known"), "well-known");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
