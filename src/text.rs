/// Text helpers shared by the extractor, analysis and catalog code.

/// Truncate to at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Remove control characters except newline, carriage return and tab.
pub fn strip_control(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

/// Strip control characters, trim and truncate.
pub fn clean_text(text: &str, max_chars: usize) -> String {
    let cleaned = strip_control(text);
    truncate_chars(cleaned.trim(), max_chars).to_string()
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate for a fixed-width column, marking the cut with "...".
pub fn ellipsize(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let keep = width.saturating_sub(3);
    format!("{}...", truncate_chars(text, keep))
}
