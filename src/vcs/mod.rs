//! VCS-agnostic capability layer.
//!
//! [`Vcs`] captures every operation the store, orchestrator, and decorator
//! need, independent of the underlying VCS. Two implementations exist:
//! [`JjBackend`](jj::JjBackend) drives Jujutsu (snapshot model, stable
//! change IDs, workspaces) and [`GitBackend`](git::GitBackend) drives git
//! (staging model, commits, worktrees). Both shell out through
//! [`crate::exec::Cmd`]; neither links a VCS library in-process.
//!
//! Use [`detect::Context::discover`] to pick a backend for a path.

pub mod detect;
pub mod git;
pub mod jj;

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Version control system kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcsKind {
    /// Snapshot-oriented DAG VCS with first-class change IDs (Jujutsu).
    Jj,
    /// Staging-based VCS with commits and an index (git).
    Git,
}

impl VcsKind {
    pub fn as_str(self) -> &'static str {
        match self {
            VcsKind::Jj => "jj",
            VcsKind::Git => "git",
        }
    }
}

impl std::fmt::Display for VcsKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node in the VCS DAG.
///
/// For the git backend, `id` is the commit hash and `is_working` is always
/// false; `is_empty` means the commit touched no files relative to its
/// first parent.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Change {
    /// Stable identifier (jj change ID, git commit hash).
    pub id: String,
    /// Display prefix of `id`.
    pub short_id: String,
    /// Description / commit message.
    pub description: String,
    /// Author email.
    pub author: String,
    /// Committer timestamp, unix seconds.
    pub timestamp: i64,
    /// Whether this is the currently editable change.
    pub is_working: bool,
    /// Whether the change carries unresolved conflicts.
    pub has_conflict: bool,
    /// Whether the change has no file modifications.
    pub is_empty: bool,
    /// Parent change IDs.
    pub parents: Vec<String>,
}

/// A named pointer to a change: jj bookmark or git branch.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BranchInfo {
    pub name: String,
    /// Remote qualifier for remote-tracking entries, `None` for local.
    pub remote: Option<String>,
    /// Remote this local branch tracks, if any.
    pub tracked_remote: Option<String>,
}

/// An on-disk working tree associated with the repository.
///
/// `path` is `None` for jj workspaces other than the one this handle is
/// bound to: jj records workspace working copies but not their filesystem
/// locations, so only the local path is known.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct WorkspaceInfo {
    pub name: String,
    pub path: Option<PathBuf>,
    /// Current working-copy change of the workspace.
    pub change_id: String,
    pub is_default: bool,
}

/// Kind of change recorded for a path in `status()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Unmodified,
    Modified,
    Added,
    Deleted,
    Renamed,
    Copied,
    Untracked,
    Ignored,
    Conflicted,
}

/// One changed path in the working copy.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StatusEntry {
    pub path: String,
    pub state: FileState,
    /// Whether the change is staged. The snapshot backend auto-snapshots
    /// the working copy, so all its entries are staged.
    pub staged: bool,
    pub conflicted: bool,
    /// Previous path for renames and copies.
    pub old_path: Option<String>,
}

/// Options recognized by [`Vcs::commit`]. Each backend documents the
/// mapping of the fields it honors.
#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    /// Fold into the previous commit instead of creating a new one.
    /// Git: `--amend`. Jj: squash the working change into its parent.
    pub amend: bool,
    /// Allow a commit with no file changes (git only; jj changes may
    /// always be empty).
    pub allow_empty: bool,
    /// Override the author, as `Name <email>`.
    pub author: Option<String>,
    /// Skip commit signing (git only).
    pub no_sign: bool,
    /// Restrict the commit to these paths.
    pub paths: Vec<PathBuf>,
}

/// A path with unresolved merge conflicts.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ConflictRecord {
    pub path: String,
}

/// Backend-neutral VCS operations.
///
/// Implementations are handles bound to one working tree: the directory
/// commands run in (`repo_root`). Opening a handle on a secondary
/// workspace's path yields a handle whose working-copy operations act on
/// that workspace.
pub trait Vcs: Send + Sync {
    // ====== Identification ======

    fn kind(&self) -> VcsKind;

    /// Absolute path of the working tree this handle is bound to.
    fn repo_root(&self) -> &Path;

    /// Whether the repository carries both VCS metadata directories.
    fn is_colocated(&self) -> bool;

    /// Escape hatch: run a raw backend command, returning stdout.
    ///
    /// The invocation goes through the same wrapper as every built-in
    /// operation, so it inherits error mapping and (for the snapshot
    /// backend) the stale-working-copy retry policy.
    fn raw(&self, args: &[&str]) -> Result<String>;

    // ====== State ======

    /// Branch/bookmark the working copy is on, if any.
    fn current_branch(&self) -> Result<Option<String>>;

    /// The current change: the editable working-copy change for the
    /// snapshot backend, HEAD for the staging backend.
    fn current_change(&self) -> Result<Change>;

    fn status(&self) -> Result<Vec<StatusEntry>>;

    /// Status restricted to one path.
    fn status_path(&self, path: &Path) -> Result<Vec<StatusEntry>>;

    fn has_remote(&self) -> Result<bool>;

    /// The remote to use for sync operations: `origin` when present,
    /// otherwise the first configured remote.
    fn get_remote(&self) -> Result<Option<String>>;

    // ====== Mutation ======

    /// Stage paths. The staging backend appends to the index; the snapshot
    /// backend opportunistically tracks paths that exist on disk and
    /// otherwise does nothing.
    fn stage(&self, paths: &[&Path]) -> Result<()>;

    fn commit(&self, message: &str, opts: &CommitOptions) -> Result<()>;

    // ====== Remote sync ======

    fn fetch(&self, remote: &str, branch: &str) -> Result<()>;

    /// Fetch and integrate. The snapshot backend has no pull; it fetches.
    fn pull(&self, remote: &str, branch: &str) -> Result<()>;

    fn push(&self, remote: &str, branch: &str) -> Result<()>;

    /// Push and record the upstream (git `-u`; jj `--allow-new`).
    fn push_with_upstream(&self, remote: &str, branch: &str) -> Result<()>;

    fn force_push(&self, remote: &str, branch: &str) -> Result<()>;

    // ====== Refs ======

    fn branch_exists(&self, name: &str) -> Result<bool>;

    /// Resolve a ref/revset expression to a change id.
    fn resolve_ref(&self, expr: &str) -> Result<String>;

    /// Whether `ancestor` is an ancestor of `descendant`.
    ///
    /// Returns `Ok(false)` both for "not an ancestor" and for revsets that
    /// resolve to nothing; callers cannot distinguish a disconnected graph
    /// from a genuine "no".
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool>;

    fn merge_base(&self, a: &str, b: &str) -> Result<String>;

    /// Number of changes in `from..to`.
    fn rev_list_count(&self, from: &str, to: &str) -> Result<usize>;

    fn log(&self, limit: usize) -> Result<Vec<Change>>;

    fn log_between(&self, from: &str, to: &str) -> Result<Vec<Change>>;

    /// Human-readable rendering of one change.
    fn show(&self, id: &str) -> Result<String>;

    fn diff(&self, from: &str, to: &str) -> Result<String>;

    fn diff_path(&self, from: &str, to: &str, path: &Path) -> Result<String>;

    // ====== Branch management ======

    fn list_branches(&self) -> Result<Vec<BranchInfo>>;

    fn create_branch(&self, name: &str) -> Result<()>;

    fn delete_branch(&self, name: &str) -> Result<()>;

    /// Move an existing branch to point at `to`.
    fn move_branch(&self, name: &str, to: &str) -> Result<()>;

    /// Point `name` at `to`, creating it if missing.
    fn set_branch(&self, name: &str, to: &str) -> Result<()>;

    fn track_branch(&self, name: &str, remote: &str) -> Result<()>;

    fn untrack_branch(&self, name: &str, remote: &str) -> Result<()>;

    fn switch_branch(&self, name: &str) -> Result<()>;

    // ====== Workspace management ======

    fn list_workspaces(&self) -> Result<Vec<WorkspaceInfo>>;

    fn create_workspace(&self, name: &str, path: &Path) -> Result<()>;

    fn remove_workspace(&self, name: &str) -> Result<()>;

    /// Refresh a stale working copy. The snapshot backend updates the
    /// workspace this handle is bound to (`name` is advisory); the staging
    /// backend has no stale state and succeeds trivially.
    fn update_stale_workspace(&self, name: &str) -> Result<()>;

    // ====== Stack navigation ======

    /// Combine a change into its parent. `None` means the current change.
    /// The staging backend amends the previous commit without editing
    /// its message.
    fn squash(&self, source: Option<&str>) -> Result<()>;

    /// Begin a fresh editable change atop the current one. No-op for the
    /// staging backend, where commits are created by [`Vcs::commit`].
    fn new_change(&self, message: Option<&str>) -> Result<()>;

    /// Set the working change (git: checkout).
    fn edit(&self, id: &str) -> Result<()>;

    fn next(&self) -> Result<()>;

    fn prev(&self) -> Result<()>;

    // ====== Files ======

    fn track_files(&self, paths: &[&Path]) -> Result<()>;

    fn untrack_files(&self, paths: &[&Path]) -> Result<()>;

    fn is_file_tracked(&self, path: &Path) -> Result<bool>;

    fn list_tracked_files(&self, prefix: &Path) -> Result<Vec<String>>;

    fn check_ignore(&self, path: &Path) -> Result<bool>;

    /// Restore `path` in the working copy from `rev`.
    fn checkout_file(&self, rev: &str, path: &Path) -> Result<()>;

    /// Contents of `path` as of `rev`.
    fn get_file_version(&self, path: &Path, rev: &str) -> Result<Vec<u8>>;

    /// Paths under `prefix` in the tree of `rev`.
    fn list_files_at(&self, rev: &str, prefix: &Path) -> Result<Vec<String>>;

    /// Discard working-copy modifications to `path`.
    fn restore_file(&self, path: &Path) -> Result<()>;

    fn reset_hard(&self, rev: &str) -> Result<()>;

    /// Remove untracked files. No-op for the snapshot backend, whose model
    /// has no untracked files.
    fn clean(&self) -> Result<()>;

    // ====== Conflicts / merge ======

    fn has_merge_conflicts(&self) -> Result<bool>;

    fn get_conflicts(&self) -> Result<Vec<ConflictRecord>>;

    fn mark_resolved(&self, path: &Path) -> Result<()>;

    fn merge(&self, branch: &str, message: &str) -> Result<()>;

    /// Whether a merge is in progress. Always false for the snapshot
    /// backend: conflicts are recorded inline in the change.
    fn is_merging(&self) -> Result<bool>;

    fn rebase(&self, onto: &str) -> Result<()>;

    fn rebase_abort(&self) -> Result<()>;

    // ====== Config & hooks ======

    fn get_config(&self, key: &str) -> Result<Option<String>>;

    fn set_config(&self, key: &str, value: &str) -> Result<()>;

    fn get_remote_url(&self, remote: &str) -> Result<Option<String>>;

    fn configure_hooks_path(&self, path: &Path) -> Result<()>;

    fn get_hooks_path(&self) -> Result<Option<String>>;

    fn configure_merge_driver(&self, command: &str, name: &str) -> Result<()>;

    // ====== Misc ======

    /// The upstream of the current branch as `remote/branch`, if tracked.
    fn get_upstream(&self) -> Result<Option<String>>;

    /// Directory shared by every workspace of this repository. The sync
    /// lock file lives here.
    fn get_common_dir(&self) -> Result<PathBuf>;

    /// The mutable changes the working copy sits on: jj `mutable()`
    /// (falling back to recent ancestors of `@`), git commits not yet on
    /// the upstream (falling back to recent history).
    fn stack_info(&self) -> Result<Vec<Change>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display() {
        assert_eq!(VcsKind::Jj.to_string(), "jj");
        assert_eq!(VcsKind::Git.as_str(), "git");
    }

    #[test]
    fn test_commit_options_default() {
        let opts = CommitOptions::default();
        assert!(!opts.amend);
        assert!(!opts.allow_empty);
        assert!(opts.author.is_none());
        assert!(opts.paths.is_empty());
    }
}
