//! Lexical URL path normalization.

/// Collapses `.`, `..` and repeated slashes into the shortest equivalent
/// rooted path. `..` never climbs above `/`, and a trailing slash is dropped.
pub fn clean(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut cleaned = String::with_capacity(path.len() + 1);
    for segment in &segments {
        cleaned.push('/');
        cleaned.push_str(segment);
    }
    if cleaned.is_empty() {
        cleaned.push('/');
    }
    cleaned
}

/// Like [`clean`], but keeps a trailing slash (except for the root itself),
/// so subtree requests stay subtree requests.
pub fn clean_keep_trailing_slash(path: &str) -> String {
    let mut cleaned = clean(path);
    if path.ends_with('/') && cleaned != "/" {
        cleaned.push('/');
    }
    cleaned
}

/// Joins two URL paths with exactly one slash between them.
pub fn join(base: &str, tail: &str) -> String {
    match (base.ends_with('/'), tail.starts_with('/')) {
        (true, true) => format!("{base}{}", &tail[1..]),
        (false, false) => format!("{base}/{tail}"),
        _ => format!("{base}{tail}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean() {
        assert_eq!(clean(""), "/");
        assert_eq!(clean("a.txt"), "/a.txt");
        assert_eq!(clean("/a/./b"), "/a/b");
        assert_eq!(clean("/a//b/"), "/a/b");
        assert_eq!(clean("/a/../b"), "/b");
        assert_eq!(clean("/../../etc/passwd"), "/etc/passwd");
        assert_eq!(clean("../.."), "/");
    }

    #[test]
    fn test_clean_keep_trailing_slash() {
        assert_eq!(clean_keep_trailing_slash("/pub/"), "/pub/");
        assert_eq!(clean_keep_trailing_slash("/pub/sub/../"), "/pub/");
        assert_eq!(clean_keep_trailing_slash("/"), "/");
        assert_eq!(clean_keep_trailing_slash("//"), "/");
        assert_eq!(clean_keep_trailing_slash("/pub"), "/pub");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/", "/a"), "/a");
        assert_eq!(join("/base", "a"), "/base/a");
        assert_eq!(join("/base/", "/a"), "/base/a");
        assert_eq!(join("/base", "/a"), "/base/a");
        assert_eq!(join("", "/a"), "/a");
    }
}
