//! Bounded-length text segmentation.
//!
//! Local models cap how much text one inference call can take, so long
//! input is split into segments before synthesis. Splitting prefers
//! sentence boundaries, falls back to whitespace, and only cuts
//! mid-word when a single token exceeds the limit. Concatenating the
//! returned segments reproduces the input exactly, so per-segment audio
//! can be joined in input order without losing or duplicating text.

/// Split `text` into segments of at most `max_len` bytes each.
///
/// Boundaries are chosen at the last sentence end (`.`, `!`, `?`, or
/// newline) inside the window, then the last whitespace, then — for an
/// unbroken over-long token — at the last character boundary that fits.
pub fn split_text(text: &str, max_len: usize) -> Vec<&str> {
    assert!(max_len > 0, "segment length must be positive");

    let mut segments = Vec::new();
    let mut rest = text;

    while rest.len() > max_len {
        let window = truncate_to_char_boundary(rest, max_len);
        let mut cut = sentence_cut(window)
            .or_else(|| whitespace_cut(window))
            .unwrap_or(window.len());
        if cut == 0 {
            // A single character wider than the limit; emit it alone
            // rather than loop forever.
            cut = rest.chars().next().map(char::len_utf8).unwrap_or(rest.len());
        }
        let (head, tail) = rest.split_at(cut);
        segments.push(head);
        rest = tail;
    }
    if !rest.is_empty() {
        segments.push(rest);
    }
    segments
}

/// Longest prefix of `s` that is at most `max_len` bytes and ends on a
/// character boundary.
fn truncate_to_char_boundary(s: &str, max_len: usize) -> &str {
    let mut end = max_len.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Byte offset just past the last sentence terminator in `window`, if any.
fn sentence_cut(window: &str) -> Option<usize> {
    window
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?' | '\n'))
        .map(|(i, c)| i + c.len_utf8())
        .last()
}

/// Byte offset just past the last whitespace character in `window`, if any.
fn whitespace_cut(window: &str) -> Option<usize> {
    window
        .char_indices()
        .filter(|(_, c)| c.is_whitespace())
        .map(|(i, c)| i + c.len_utf8())
        .last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn short_text_is_one_segment() {
        assert_eq!(split_text("hello world", 100), vec!["hello world"]);
    }

    #[test]
    fn empty_text_yields_no_segments() {
        assert!(split_text("", 10).is_empty());
    }

    #[test]
    fn splits_at_sentence_boundary() {
        let segments = split_text("One sentence. Another sentence follows here.", 20);
        assert_eq!(segments[0], "One sentence. ");
    }

    #[test]
    fn falls_back_to_whitespace() {
        let segments = split_text("no terminators only plain words here", 15);
        for seg in &segments {
            assert!(seg.len() <= 15, "segment too long: {:?}", seg);
        }
        assert_eq!(segments.concat(), "no terminators only plain words here");
    }

    #[test]
    fn hard_cuts_unbroken_token() {
        let segments = split_text("aaaaaaaaaaaaaaaaaaaa", 8);
        assert_eq!(segments, vec!["aaaaaaaa", "aaaaaaaa", "aaaa"]);
    }

    #[test]
    fn never_splits_inside_multibyte_char() {
        let text = "éééééééééé"; // 2 bytes per char
        for seg in split_text(text, 5) {
            assert!(seg.chars().count() > 0);
            assert!(seg.len() <= 5);
        }
    }

    proptest! {
        #[test]
        fn concatenation_is_lossless(text in ".{0,400}", max_len in 1usize..64) {
            let segments = split_text(&text, max_len);
            prop_assert_eq!(segments.concat(), text);
        }

        #[test]
        fn segments_respect_bound(text in ".{0,400}", max_len in 4usize..64) {
            for seg in split_text(&text, max_len) {
                prop_assert!(seg.len() <= max_len, "segment {:?} exceeds {}", seg, max_len);
                prop_assert!(!seg.is_empty());
            }
        }
    }
}
