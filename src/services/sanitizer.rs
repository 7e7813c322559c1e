//! Turns an untrusted client filename into a storage key.

/// Normalize a client-supplied filename into a key made only of
/// `[A-Za-z0-9._-]`.
///
/// Surrounding whitespace is trimmed, `..` sequences are removed and every
/// other character becomes `_`. Total and idempotent; `""` maps to `""`.
pub fn sanitize_filename(name: &str) -> String {
    // Left-to-right removal leaves every run of dots with at most one dot.
    name.trim()
        .replace("..", "")
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '_',
        })
        .collect()
}
