/// Canonical form used for exact deduplication and substring recall.
///
/// Trims surrounding whitespace and lowercases with full Unicode case mapping.
/// Interior whitespace is left untouched.
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}
