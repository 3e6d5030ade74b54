//! Small pure text helpers.

/// Marker appended to tool result text that exceeded the size cap.
pub const TRUNCATION_MARKER: &str = "...(truncated)";

/// Truncate `s` and append `suffix` if it exceeds `threshold` characters.
///
/// - `threshold`: character count at which truncation kicks in.
/// - `take`: how many characters of content to keep when truncating.
fn truncate_core(s: &str, threshold: usize, take: usize, suffix: &str) -> String {
    if s.chars().count() <= threshold {
        return s.to_string();
    }
    let head: String = s.chars().take(take).collect();
    format!("{head}{suffix}")
}

/// Cap tool result text at `max_chars` characters of content.
///
/// The marker does NOT count toward the budget: the returned string may be up to
/// `max_chars + TRUNCATION_MARKER.len()` characters.
#[must_use]
pub fn cap_result_text(raw: &str, max_chars: usize) -> String {
    truncate_core(raw, max_chars, max_chars, TRUNCATION_MARKER)
}

/// Truncate a string to a maximum length, adding `...` if needed.
///
/// - Trims surrounding whitespace before truncating.
/// - Uses `char` count (not bytes) to avoid splitting Unicode scalar values.
/// - Enforces a minimum `max` of 3 so the ellipsis fits.
#[must_use]
pub fn truncate_with_ellipsis(raw: &str, max: usize) -> String {
    let max = max.max(3);
    let take = max - 3;
    truncate_core(raw.trim(), max, take, "...")
}
