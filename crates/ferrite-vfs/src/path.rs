//! Virtual path normalization.
//!
//! All VFS paths are absolute, `/`-separated strings.  Normalization
//! collapses `.` and `..` segments and duplicate separators so that every
//! path has exactly one canonical spelling before it reaches the mount
//! table.

/// Collapse `.`/`..` segments and duplicate slashes.
///
/// The result always starts with `/` and never ends with one (except for the
/// root itself).  `..` at the root is silently dropped.
pub fn normalize(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }
    let mut out = String::from("/");
    out.push_str(&stack.join("/"));
    out
}

/// Join `rel` onto `base`.  An absolute `rel` replaces `base` entirely.
pub fn join(base: &str, rel: &str) -> String {
    if rel.starts_with('/') {
        normalize(rel)
    } else {
        normalize(&format!("{base}/{rel}"))
    }
}

/// Parent directory of a normalized path, or `None` for the root.
pub fn parent(path: &str) -> Option<String> {
    let normalized = normalize(path);
    if normalized == "/" {
        return None;
    }
    match normalized.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(normalized[..idx].to_string()),
        None => None,
    }
}

/// Final component of a normalized path, or `None` for the root.
pub fn file_name(path: &str) -> Option<String> {
    let normalized = normalize(path);
    if normalized == "/" {
        return None;
    }
    normalized.rsplit('/').next().map(|s| s.to_string())
}

/// Every ancestor directory of `path`, outermost first, excluding the path
/// itself.  Used for traversal permission checks.
pub fn ancestors(path: &str) -> Vec<String> {
    let normalized = normalize(path);
    let mut out = vec!["/".to_string()];
    if normalized == "/" {
        return out;
    }
    let mut current = String::new();
    let parts: Vec<&str> = normalized[1..].split('/').collect();
    for part in &parts[..parts.len().saturating_sub(1)] {
        current.push('/');
        current.push_str(part);
        out.push(current.clone());
    }
    out
}
