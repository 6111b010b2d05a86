//! Path normalization and pattern parsing.

use std::borrow::Cow;

/// Collapses repeated `/`, ensures a leading `/` and trims any trailing `/`.
///
/// Borrows when `path` is already normal, which is the common case on the
/// request path.
pub fn normalize(path: &str) -> Cow<'_, str> {
    if is_normal(path) {
        return Cow::Borrowed(path);
    }

    let mut out = String::with_capacity(path.len() + 1);
    for seg in path.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(seg);
    }
    if out.is_empty() {
        out.push('/');
    }
    Cow::Owned(out)
}

fn is_normal(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    path.starts_with('/') && !path.ends_with('/') && !path.contains("//")
}

/// Joins a group prefix and a route path, then normalizes the result.
pub(crate) fn join(prefix: &str, path: &str) -> String {
    let mut joined = String::with_capacity(prefix.len() + path.len() + 1);
    joined.push_str(prefix);
    joined.push('/');
    joined.push_str(path);
    normalize(&joined).into_owned()
}

/// One parsed segment of a registered pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Segment<'p> {
    Static(&'p str),
    Named(&'p str),
    Wildcard(&'p str),
}

/// Splits a normalized pattern into segments.
///
/// Fails with a static reason when a parameter is unnamed, a name repeats,
/// or a wildcard is not the final segment.
pub(crate) fn parse(pattern: &str) -> Result<Vec<Segment<'_>>, &'static str> {
    let body = pattern.strip_prefix('/').unwrap_or(pattern);
    if body.is_empty() {
        return Ok(Vec::new());
    }

    let raw: Vec<&str> = body.split('/').collect();
    let mut segments = Vec::with_capacity(raw.len());
    let mut names: Vec<&str> = Vec::new();

    for (i, seg) in raw.iter().enumerate() {
        let parsed = if let Some(name) = seg.strip_prefix(':') {
            Segment::Named(name)
        } else if let Some(name) = seg.strip_prefix('*') {
            if i + 1 != raw.len() {
                return Err("wildcard must be the last segment");
            }
            Segment::Wildcard(name)
        } else {
            Segment::Static(seg)
        };

        if let Segment::Named(name) | Segment::Wildcard(name) = parsed {
            if name.is_empty() {
                return Err("parameter name must not be empty");
            }
            if names.contains(&name) {
                return Err("parameter name repeats within the pattern");
            }
            names.push(name);
        }
        segments.push(parsed);
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_borrows_clean_paths() {
        assert!(matches!(normalize("/users/42"), Cow::Borrowed(_)));
        assert!(matches!(normalize("/"), Cow::Borrowed(_)));
    }

    #[test]
    fn normalize_collapses_and_trims() {
        assert_eq!(normalize("//users///42/"), "/users/42");
        assert_eq!(normalize("users"), "/users");
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("///"), "/");
    }

    #[test]
    fn join_handles_slashes_on_either_side() {
        assert_eq!(join("/api/", "/users"), "/api/users");
        assert_eq!(join("api", "users/"), "/api/users");
        assert_eq!(join("", "/"), "/");
        assert_eq!(join("/api", ""), "/api");
    }

    #[test]
    fn parse_segments() {
        assert_eq!(
            parse("/files/:bkt/*fp").unwrap(),
            vec![
                Segment::Static("files"),
                Segment::Named("bkt"),
                Segment::Wildcard("fp"),
            ]
        );
        assert!(parse("/").unwrap().is_empty());
    }

    #[test]
    fn parse_rejects_bad_patterns() {
        assert!(parse("/a/*rest/b").is_err());
        assert!(parse("/a/:").is_err());
        assert!(parse("/a/*").is_err());
        assert!(parse("/a/:id/b/:id").is_err());
    }
}
