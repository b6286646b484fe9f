//! Small string helpers used across the gateway, debate, and task logs.

/// Truncate `s` to at most `max_chars` UTF-8-safe bytes, appending `...`
/// when truncation actually happened.
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.len() <= max_chars {
        return s.to_string();
    }
    let mut boundary = max_chars;
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }
    format!("{}...", &s[..boundary])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_short_strings_untouched() {
        assert_eq!(truncate_str("hi", 10), "hi");
    }

    #[test]
    fn truncates_long_strings_on_a_char_boundary() {
        let s = "héllo wörld";
        let truncated = truncate_str(s, 4);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= 4 + 3 + 3); // allow for multi-byte chars at the boundary
    }
}
