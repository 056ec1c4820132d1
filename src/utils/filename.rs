//! File name helpers.

/// Replace path separators and reserved characters so a name is safe to
/// embed in identifiers and paths.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = sanitized.trim().trim_matches('_');
    if trimmed.is_empty() {
        "document".to_string()
    } else {
        trimmed.chars().take(100).collect()
    }
}

/// Case-insensitive check of a file name's extension (without the dot).
pub fn has_extension(name: &str, ext: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(stem, found)| !stem.is_empty() && found.eq_ignore_ascii_case(ext))
}
