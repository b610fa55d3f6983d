//! Small pure text helpers for markup output and trim points.

/// Escape a string for inclusion in HTML text or attribute content.
///
/// Escapes the five characters with reserved meaning. Everything else passes
/// through untouched, including multi-byte sequences.
#[must_use]
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Whether a rendered chunk contains only whitespace markup.
///
/// Used by trim-blank points to decide if everything back to the previous
/// checkpoint can be deleted outright.
#[must_use]
pub fn is_blank_markup(s: &str) -> bool {
    s.chars().all(char::is_whitespace)
}

/// Remove trailing whitespace in place, returning whether anything changed.
pub fn trim_trailing_whitespace(s: &mut String) -> bool {
    let trimmed_len = s.trim_end().len();
    if trimmed_len == s.len() {
        return false;
    }
    s.truncate(trimmed_len);
    true
}

/// Remove leading whitespace in place, returning whether anything changed.
pub fn trim_leading_whitespace(s: &mut String) -> bool {
    let start = s.len() - s.trim_start().len();
    if start == 0 {
        return false;
    }
    s.drain(..start);
    true
}
