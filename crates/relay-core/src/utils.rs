/// Truncate text for log previews (char-safe).
pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    format!("{}...", s.chars().take(max_len).collect::<String>())
}

/// Split `s` into chunks of at most `max_chars` characters.
///
/// Prefers breaking after the last newline inside a chunk so paragraphs stay
/// intact; falls back to a hard cut when a single line is too long.
pub fn split_text(s: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let chars: Vec<char> = s.chars().collect();
    let mut out = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let hard_end = (start + max_chars).min(chars.len());
        let mut end = hard_end;
        if hard_end < chars.len() {
            if let Some(nl) = chars[start..hard_end].iter().rposition(|&c| c == '\n') {
                if nl > 0 {
                    end = start + nl + 1;
                }
            }
        }
        out.push(chars[start..end].iter().collect());
        start = end;
    }
    out
}
