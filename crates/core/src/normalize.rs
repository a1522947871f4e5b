//! Key normalization for free-text product names and lot numbers.

/// Normalize a free-text key: trim, collapse internal whitespace, lowercase.
///
/// Sale lines are typed at the counter while lots come from supplier
/// paperwork, so matching must not depend on casing or spacing.
pub fn normalize_key(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
