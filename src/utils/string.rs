/// Largest valid UTF-8 boundary at or before the given byte index.
#[inline]
fn safe_byte_boundary(s: &str, max_bytes: usize) -> usize {
    if max_bytes >= s.len() {
        return s.len();
    }
    s.char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= max_bytes)
        .last()
        .unwrap_or(0)
}

/// Truncate to a maximum byte length, returning a borrowed slice.
/// Respects UTF-8 character boundaries; ASCII input truncates exactly.
#[inline]
pub fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        s
    } else {
        &s[..safe_byte_boundary(s, max_len)]
    }
}

/// Truncate with a marker suffix when the input exceeds the limit.
#[inline]
pub fn truncate_with_marker(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...[truncated]", truncate_str(s, max_len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_str_exact_on_ascii() {
        assert_eq!(truncate_str("abcdef", 4), "abcd");
        assert_eq!(truncate_str("abc", 4), "abc");
    }

    #[test]
    fn truncate_str_respects_utf8_boundaries() {
        let s = "héllo";
        let out = truncate_str(s, 2);
        assert!(s.is_char_boundary(out.len()));
        assert_eq!(out, "h");
    }

    #[test]
    fn marker_added_only_when_truncated() {
        assert_eq!(truncate_with_marker("short", 10), "short");
        assert!(truncate_with_marker("a long string", 6).ends_with("...[truncated]"));
    }
}
