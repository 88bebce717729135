//! Node path helpers.
//!
//! Paths are slash-delimited, absolute within their namespace (`/a/b`), have
//! no trailing slash except for the root and no empty, `.` or `..` segments.

use crate::Error;
use crate::Result;

pub const ROOT: &str = "/";

pub fn validate(path: &str) -> Result<()> {
    let invalid = |reason: &'static str| {
        Err(Error::InvalidPath {
            path: path.to_string(),
            reason,
        })
    };

    if path.is_empty() {
        return invalid("path must not be empty");
    }
    if !path.starts_with('/') {
        return invalid("path must start with '/'");
    }
    if path == ROOT {
        return Ok(());
    }
    if path.ends_with('/') {
        return invalid("path must not end with '/'");
    }
    if path.contains('\0') {
        return invalid("path must not contain NUL");
    }
    for segment in path[1..].split('/') {
        match segment {
            "" => return invalid("path must not contain empty segments"),
            "." | ".." => return invalid("relative segments are not allowed"),
            _ => {}
        }
    }
    Ok(())
}

/// Turns a configured namespace into an absolute prefix.
///
/// `""` and `"/"` mean no namespace; `"app"` becomes `"/app"`.
pub fn normalize_namespace(namespace: &str) -> Result<String> {
    let trimmed = namespace.trim();
    if trimmed.is_empty() || trimmed == ROOT {
        return Ok(String::new());
    }
    let absolute = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    };
    validate(&absolute)?;
    Ok(absolute)
}

/// Prefixes a namespace-relative path with the namespace root.
pub fn resolve(
    namespace: &str,
    path: &str,
) -> Result<String> {
    validate(path)?;
    if namespace.is_empty() {
        return Ok(path.to_string());
    }
    if path == ROOT {
        return Ok(namespace.to_string());
    }
    Ok(format!("{}{}", namespace, path))
}

/// Strips the namespace root from an absolute service path.
///
/// Paths outside the namespace are returned unchanged.
pub fn relativize(
    namespace: &str,
    absolute: &str,
) -> String {
    if namespace.is_empty() {
        return absolute.to_string();
    }
    if absolute == namespace {
        return ROOT.to_string();
    }
    match absolute.strip_prefix(namespace) {
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        _ => absolute.to_string(),
    }
}

pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

pub fn join(
    parent: &str,
    child: &str,
) -> String {
    if parent == ROOT {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Proper ancestors below the root, shallowest first: `/a/b/c` gives `[/a, /a/b]`.
pub fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = path;
    while let Some(p) = parent(current) {
        if p == ROOT {
            break;
        }
        out.push(p.to_string());
        current = p;
    }
    out.reverse();
    out
}

pub fn is_ancestor_or_self(
    ancestor: &str,
    path: &str,
) -> bool {
    if ancestor == ROOT || ancestor == path {
        return true;
    }
    path.len() > ancestor.len() && path.starts_with(ancestor) && path.as_bytes()[ancestor.len()] == b'/'
}
