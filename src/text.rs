//! Text normalization for ideas.
//!
//! Two canonical forms exist: the stored display text (whitespace collapsed,
//! guaranteed terminal punctuation) and the duplicate key (lowercased, with
//! trailing terminators stripped). The key is what the unique index protects.

/// Collapse whitespace runs to single spaces, trim, and append a `.` when
/// the text does not already end in `.`, `!`, or `?`.
pub fn normalize_idea_text(text: &str) -> String {
    let mut cleaned = collapse_ws(text);
    if !cleaned.ends_with(['.', '!', '?']) {
        cleaned.push('.');
    }
    cleaned
}

/// Duplicate-detection key: lowercase, whitespace-collapsed, trailing
/// `.`/`!`/`?` runs stripped.
pub fn idea_text_key(text: &str) -> String {
    let cleaned = collapse_ws(&text.to_lowercase());
    cleaned.trim_end_matches(['.', '!', '?']).to_string()
}

/// Truncate to at most `max` characters, respecting char boundaries.
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
