//! Lexical handling of logical absolute paths.

use crate::error::{ConsoleError, Result};

/// Normalises an absolute `/`-separated path without touching the filesystem.
///
/// Empty and `.` segments are dropped, `..` pops a segment but never above `/`,
/// and trailing slashes are removed.
pub fn normalize(raw: &str) -> Result<String> {
    if !raw.starts_with('/') {
        return Err(ConsoleError::InvalidPath {
            path: raw.to_string(),
            reason: "path must be absolute",
        });
    }
    if raw.contains('\0') {
        return Err(ConsoleError::InvalidPath {
            path: raw.to_string(),
            reason: "path contains a NUL byte",
        });
    }

    let mut parts: Vec<&str> = Vec::new();
    for seg in raw.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }

    if parts.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(format!("/{}", parts.join("/")))
    }
}

/// Parent of a normalised path; `None` for `/`.
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Final segment of a normalised path; `/` for the root.
pub fn file_name(path: &str) -> &str {
    if path == "/" {
        return "/";
    }
    path.rsplit('/').next().unwrap_or(path)
}

/// Joins a child name onto a normalised directory path.
pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Whether `path` equals `prefix` or lies below it, on segment boundaries.
pub fn is_within(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    path == prefix
        || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_lexically() {
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("/app/").unwrap(), "/app");
        assert_eq!(normalize("//app/./lib/../").unwrap(), "/app");
        assert_eq!(normalize("/../..").unwrap(), "/");
    }

    #[test]
    fn rejects_relative_paths() {
        let err = normalize("app/lib").unwrap_err();
        assert_eq!(err.kind(), "invalid_path");
    }

    #[test]
    fn parent_and_name() {
        assert_eq!(parent("/"), None);
        assert_eq!(parent("/app"), Some("/"));
        assert_eq!(parent("/app/lib"), Some("/app"));
        assert_eq!(file_name("/app/lib"), "lib");
        assert_eq!(join("/", "app"), "/app");
        assert_eq!(join("/app", "lib"), "/app/lib");
    }

    #[test]
    fn within_respects_segment_boundaries() {
        assert!(is_within("/proc/1/status", "/proc"));
        assert!(is_within("/proc", "/proc"));
        assert!(!is_within("/processes", "/proc"));
        assert!(is_within("/anything", "/"));
    }
}
