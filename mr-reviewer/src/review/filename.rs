//! Normalizes model-reported filenames against the files of the patch set.

/// Maps `name` onto one of `files`.
///
/// Exact match first, then the name without a leading `./`, `/`, `a/` or
/// `b/`, then the shortest file path containing the name. `None` when no file
/// matches.
pub fn sanitize<'a, I>(name: &str, files: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let files: Vec<&str> = files.into_iter().collect();

    if files.contains(&name) {
        return Some(name.to_string());
    }

    let stripped = ["./", "/", "a/", "b/"]
        .iter()
        .find_map(|p| name.strip_prefix(p))
        .unwrap_or(name);
    if files.contains(&stripped) {
        return Some(stripped.to_string());
    }
    if stripped.is_empty() {
        return None;
    }

    files
        .iter()
        .filter(|f| f.contains(stripped))
        .min_by_key(|f| f.len())
        .map(|f| f.to_string())
}
