//! Typed errors for wong operations.
//!
//! Every fallible library operation returns [`Error`]. Variants carry the
//! structured data callers branch on; `is_*` helpers cover the common
//! checks so callers don't need to pattern-match the whole enum.
//!
//! The `wj` binary converts these into `anyhow::Error` at its outermost
//! layer; inside the library, errors stay typed.

use std::path::PathBuf;

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Domain errors for VCS, store, and orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No VCS metadata directory found walking up from the start path.
    #[error("no version control repository found above {}", start.display())]
    NoVcsFound { start: PathBuf },

    /// The path exists but is not inside a repository of the expected kind.
    #[error("not in a repository: {}", path.display())]
    NotInRepo { path: PathBuf },

    /// The repository has no remote configured.
    #[error("no remote configured")]
    NoRemote,

    /// A named branch or bookmark does not exist.
    #[error("branch not found: '{name}'")]
    BranchNotFound { name: String },

    /// A named workspace does not exist.
    #[error("workspace not found: '{name}'")]
    WorkspaceNotFound { name: String },

    /// A workspace with this name already exists.
    #[error("workspace already exists: '{name}'")]
    WorkspaceExists { name: String },

    /// The working copy has unresolved merge conflicts.
    #[error("merge conflicts in {} file(s)", paths.len())]
    MergeConflict { paths: Vec<String> },

    /// A commit was requested but there is nothing to commit.
    #[error("nothing to commit")]
    NothingToCommit,

    /// The operation is not supported by this backend.
    #[error("'{operation}' is not supported by the {backend} backend")]
    NotSupported {
        operation: &'static str,
        backend: &'static str,
    },

    /// An issue id failed validation; no path was constructed from it.
    #[error("invalid issue id '{id}': {reason}")]
    InvalidIssueId { id: String, reason: &'static str },

    /// A subtask's squash back into its parent produced conflicts. The
    /// subtask's workspace is preserved on disk for manual resolution.
    #[error("subtask '{subtask_id}' conflicted: {message}")]
    SubtaskConflict {
        subtask_id: String,
        description: String,
        message: String,
    },

    /// No subtask with this id is known to the orchestrator.
    #[error("subtask not found: '{id}'")]
    SubtaskNotFound { id: String },

    /// Conflict resolution was requested for a subtask that is not in the
    /// conflicted state.
    #[error("subtask '{id}' is not conflicted (state: {state})")]
    SubtaskNotConflicted { id: String, state: String },

    /// A backend child process exited non-zero (and the exit was not one of
    /// the recognized boolean or benign patterns).
    #[error("{backend} {command} failed: {}", first_stderr_line(.stderr))]
    CommandFailed {
        backend: &'static str,
        command: String,
        args: Vec<String>,
        stderr: String,
        code: Option<i32>,
    },

    /// The operation was cancelled or its deadline expired.
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a `CommandFailed` from the pieces of a finished child process.
    pub(crate) fn command_failed(
        backend: &'static str,
        args: &[String],
        stderr: &str,
        code: Option<i32>,
    ) -> Self {
        Error::CommandFailed {
            backend,
            command: args.first().cloned().unwrap_or_default(),
            args: args.to_vec(),
            stderr: stderr.to_string(),
            code,
        }
    }

    /// Stderr of the failed command, if this is a `CommandFailed`.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Error::CommandFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

/// First non-empty stderr line, for one-line error display.
fn first_stderr_line(stderr: &str) -> &str {
    stderr
        .lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("(no output)")
}

/// True if the error is a merge conflict (either backend-level or a
/// subtask squash conflict).
pub fn is_conflict(err: &Error) -> bool {
    matches!(
        err,
        Error::MergeConflict { .. } | Error::SubtaskConflict { .. }
    )
}

/// True if the error means the repository has no remote.
pub fn is_no_remote(err: &Error) -> bool {
    matches!(err, Error::NoRemote)
}

/// True if the error came from a failed backend invocation.
pub fn is_command_failed(err: &Error) -> bool {
    matches!(err, Error::CommandFailed { .. })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_display_uses_first_stderr_line() {
        let err = Error::command_failed(
            "jj",
            &["squash".into(), "--from".into(), "@".into()],
            "\nError: would create a loop\nHint: try rebasing\n",
            Some(1),
        );
        assert_eq!(err.to_string(), "jj squash failed: Error: would create a loop");
    }

    #[test]
    fn test_command_failed_display_empty_stderr() {
        let err = Error::command_failed("git", &["push".into()], "", Some(128));
        assert_eq!(err.to_string(), "git push failed: (no output)");
    }

    #[test]
    fn test_predicates() {
        let conflict = Error::MergeConflict {
            paths: vec![".wong/issues/x.json".into()],
        };
        assert!(is_conflict(&conflict));
        assert!(!is_no_remote(&conflict));

        let sub = Error::SubtaskConflict {
            subtask_id: "task-abc123-d4e5f6".into(),
            description: "port the parser".into(),
            message: "2 conflicted paths".into(),
        };
        assert!(is_conflict(&sub));

        assert!(is_no_remote(&Error::NoRemote));
        assert!(!is_command_failed(&Error::NoRemote));
    }

    #[test]
    fn test_invalid_issue_id_display() {
        let err = Error::InvalidIssueId {
            id: "../etc/passwd".into(),
            reason: "contains a path separator",
        };
        assert_eq!(
            err.to_string(),
            "invalid issue id '../etc/passwd': contains a path separator"
        );
    }
}
