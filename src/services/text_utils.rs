//! Shared text normalization and comparison utilities
//!
//! Folder names and filenames are typed by different people with different
//! habits; everything that compares names goes through these helpers.

/// Normalize a name for word-level matching.
/// Lowercases, treats `.`, `-` and `_` as spaces and collapses whitespace.
///
/// # Example
/// ```ignore
/// assert_eq!(normalize_name("03_Jiwoo-Math"), "03 jiwoo math");
/// ```
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .replace(['.', '-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalize a group name or topic folder for comparison.
/// Strips all whitespace and lowercases, so "Math A" and "matha" compare equal.
pub fn normalize_group_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Whether the words of `needle` appear as a contiguous run in `haystack`.
/// Both sides are expected to be [normalize_name]d already.
pub fn contains_word_sequence(haystack: &str, needle: &str) -> bool {
    let needle: Vec<&str> = needle.split_whitespace().collect();
    if needle.is_empty() {
        return false;
    }
    let haystack: Vec<&str> = haystack.split_whitespace().collect();
    haystack.windows(needle.len()).any(|window| window == needle.as_slice())
}

/// Jaro-Winkler similarity of two names after normalization (0.0 to 1.0)
pub fn name_similarity(a: &str, b: &str) -> f64 {
    strsim::jaro_winkler(&normalize_name(a), &normalize_name(b))
}

/// The candidate most similar to `name`, if any clears `threshold`
pub fn closest_name<'a, I>(name: &str, candidates: I, threshold: f64) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    candidates
        .into_iter()
        .map(|candidate| (candidate, name_similarity(name, candidate)))
        .filter(|(_, score)| *score >= threshold)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(candidate, _)| candidate)
}
