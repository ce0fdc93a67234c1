use std::io;

use thiserror::Error;

use crate::model::Source;

/// Every failure a console operation can report to its caller.
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("path not found: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not present in build snapshot: {0}")]
    NotInSnapshot(String),
    #[error("{op} is not permitted against the {against} source")]
    PolicyViolation { op: Operation, against: Source },
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("cannot decode {0} as text")]
    Decode(String),
    #[error("failed to spawn {program}: {message}")]
    SpawnFailure { program: String, message: String },
    #[error("process exited with status {0}")]
    ProcessExitNonZero(i32),
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("malformed snapshot line {line}: {reason}")]
    MalformedSnapshot { line: usize, reason: String },
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl ConsoleError {
    /// Maps a native filesystem error onto the typed taxonomy.
    pub fn from_io(err: io::Error, path: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_string()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_string()),
            io::ErrorKind::NotADirectory => Self::NotADirectory(path.to_string()),
            io::ErrorKind::IsADirectory => Self::IsADirectory(path.to_string()),
            _ => Self::Io {
                path: path.to_string(),
                source: err,
            },
        }
    }

    /// Stable snake_case tag reported alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::NotADirectory(_) => "not_a_directory",
            Self::IsADirectory(_) => "is_a_directory",
            Self::PermissionDenied(_) => "permission_denied",
            Self::NotInSnapshot(_) => "not_in_snapshot",
            Self::PolicyViolation { .. } => "policy_violation",
            Self::InvalidPath { .. } => "invalid_path",
            Self::Decode(_) => "decode_error",
            Self::SpawnFailure { .. } => "spawn_failure",
            Self::ProcessExitNonZero(_) => "process_exit_non_zero",
            Self::MissingParameter(_) => "missing_parameter",
            Self::MalformedSnapshot { .. } => "malformed_snapshot",
            Self::Io { .. } => "io",
        }
    }
}

/// Operations gated by the source policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    View,
    Download,
    Delete,
}

impl Operation {
    /// Only listing is allowed against the frozen snapshot.
    pub fn allowed_on(self, source: Source) -> bool {
        matches!(source, Source::Runtime) || self == Operation::List
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operation::List => "list",
            Operation::View => "view",
            Operation::Download => "download",
            Operation::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ConsoleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_taxonomy() {
        let e = ConsoleError::from_io(io::Error::from(io::ErrorKind::NotFound), "/x");
        assert_eq!(e.kind(), "not_found");
        let e = ConsoleError::from_io(io::Error::from(io::ErrorKind::PermissionDenied), "/x");
        assert_eq!(e.kind(), "permission_denied");
        let e = ConsoleError::from_io(io::Error::from(io::ErrorKind::Other), "/x");
        assert_eq!(e.kind(), "io");
    }

    #[test]
    fn build_source_only_allows_listing() {
        assert!(Operation::List.allowed_on(Source::Build));
        for op in [Operation::View, Operation::Download, Operation::Delete] {
            assert!(!op.allowed_on(Source::Build));
            assert!(op.allowed_on(Source::Runtime));
        }
    }
}
