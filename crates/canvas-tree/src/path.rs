//! Path normalization and prefix arithmetic for the slash-delimited namespace.

use crate::error::{Error, Result};

pub const ROOT: &str = "/";

/// Normalize a caller-supplied path.
///
/// Leading slash is enforced, repeated and trailing slashes collapse, empty
/// input is the root. `.`/`..` segments and control characters are rejected.
pub fn normalize(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len() + 1);
    for segment in trimmed.split('/').filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." {
            return Err(Error::InvalidPath {
                path: raw.to_string(),
                reason: "relative segments are not allowed",
            });
        }
        if segment.chars().any(char::is_control) {
            return Err(Error::InvalidPath {
                path: raw.to_string(),
                reason: "control characters are not allowed",
            });
        }
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

pub fn is_root(path: &str) -> bool {
    path == ROOT
}

/// Segments of a normalized path; empty for the root.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

pub fn depth(path: &str) -> usize {
    segments(path).count()
}

/// Last segment, or `/` for the root.
pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) if !is_root(path) => &path[idx + 1..],
        _ => ROOT,
    }
}

pub fn parent(path: &str) -> Option<&str> {
    if is_root(path) {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Every proper prefix of `path`, root first.
pub fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = path;
    while let Some(p) = parent(current) {
        out.push(p.to_string());
        current = p;
    }
    out.reverse();
    out
}

/// Prefix shared by every proper descendant of `path`.
pub fn descendant_prefix(path: &str) -> String {
    if is_root(path) {
        ROOT.to_string()
    } else {
        format!("{path}/")
    }
}

/// True when `candidate` lies strictly below `path`.
pub fn is_descendant(candidate: &str, path: &str) -> bool {
    candidate != path && candidate.starts_with(&descendant_prefix(path))
}

/// Substitute the `from` prefix of `path` with `to`.
pub fn rebase(path: &str, from: &str, to: &str) -> String {
    if path == from {
        return to.to_string();
    }
    let rest = &path[descendant_prefix(from).len()..];
    if is_root(to) {
        format!("/{rest}")
    } else {
        format!("{to}/{rest}")
    }
}
