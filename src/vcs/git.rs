//! Git implementation of the [`Vcs`] trait.
//!
//! Drives the `git` binary over the conventional staging/index model.
//! Status parsing uses the NUL-delimited porcelain formats so paths with
//! spaces or unusual bytes round-trip; worktree listing parses the
//! porcelain block format.
//!
//! Child processes run with `GIT_TEMPLATE_DIR` and `GIT_HOOKS_PATH`
//! cleared so no unexpected scripts execute under us. A handful of
//! commands signal a boolean through exit code 1 (`check-ignore`,
//! `merge-base --is-ancestor`, `diff --quiet`, `ls-files
//! --error-unmatch`); those are translated to `Ok(false)` individually.
//! The translation is never generalized, so real failures still surface.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::exec::{CancelToken, Cmd, CmdOutput};

use super::{
    BranchInfo, Change, CommitOptions, ConflictRecord, FileState, StatusEntry, Vcs, VcsKind,
    WorkspaceInfo,
};

/// Backend binary name.
pub const GIT_BIN: &str = "git";

/// Environment variables cleared from every child invocation.
const SCRUBBED_ENV: &[&str] = &["GIT_TEMPLATE_DIR", "GIT_HOOKS_PATH"];

/// Commit log format: NUL-separated hash, short hash, subject, author
/// email, committer unix time, parent hashes.
const LOG_FORMAT: &str = "--format=%H%x00%h%x00%s%x00%ae%x00%ct%x00%P";

/// Git-backed [`Vcs`] handle, bound to one worktree root.
#[derive(Debug, Clone)]
pub struct GitBackend {
    root: PathBuf,
    colocated: bool,
    cancel: CancelToken,
}

impl GitBackend {
    /// Open a handle at a worktree root (the directory containing `.git`,
    /// which may be a file for linked worktrees).
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        if !root.join(".git").exists() {
            return Err(Error::NotInRepo { path: root });
        }
        let colocated = root.join(".jj").is_dir();
        Ok(Self {
            root,
            colocated,
            cancel: CancelToken::never(),
        })
    }

    /// A handle on the same repository carrying `token`.
    pub fn with_cancel_token(&self, token: CancelToken) -> Self {
        let mut clone = self.clone();
        clone.cancel = token;
        clone
    }

    fn run_output(&self, args: &[&str]) -> Result<CmdOutput> {
        let mut cmd = Cmd::new(GIT_BIN)
            .args(args.iter().copied())
            .current_dir(&self.root)
            .cancel_token(self.cancel.clone());
        for var in SCRUBBED_ENV {
            cmd = cmd.env_remove(var);
        }
        cmd.output()
    }

    fn run_raw(&self, args: &[&str]) -> Result<CmdOutput> {
        let output = self.run_output(args)?;
        if output.success() {
            Ok(output)
        } else {
            let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
            Err(Error::command_failed(
                "git",
                &owned,
                output.stderr_utf8().trim(),
                output.code(),
            ))
        }
    }

    pub(crate) fn run(&self, args: &[&str]) -> Result<String> {
        Ok(self.run_raw(args)?.stdout_utf8())
    }

    fn run_bytes(&self, args: &[&str]) -> Result<Vec<u8>> {
        Ok(self.run_raw(args)?.stdout)
    }

    /// Run a command whose exit code 1 means "no". Only the four commands
    /// named in the module docs use this path.
    fn run_bool(&self, args: &[&str]) -> Result<bool> {
        let output = self.run_output(args)?;
        if output.success() {
            return Ok(true);
        }
        if output.code() == Some(1) {
            return Ok(false);
        }
        let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        Err(Error::command_failed(
            "git",
            &owned,
            output.stderr_utf8().trim(),
            output.code(),
        ))
    }

    fn change_at(&self, rev: &str) -> Result<Change> {
        let out = self.run(&["log", "-1", LOG_FORMAT, rev, "--"])?;
        let is_empty = self.commit_is_empty(rev)?;
        parse_log_record(out.trim_end_matches('\n'), is_empty).ok_or_else(|| {
            Error::BranchNotFound {
                name: rev.to_string(),
            }
        })
    }

    /// Whether `rev` has no file changes against its first parent.
    fn commit_is_empty(&self, rev: &str) -> Result<bool> {
        let parents = self.run(&["rev-list", "--parents", "-n", "1", rev])?;
        let has_parent = parents.split_whitespace().count() > 1;
        if !has_parent {
            let out = self.run(&["ls-tree", "-r", "--name-only", rev])?;
            return Ok(out.trim().is_empty());
        }
        let first_parent = format!("{rev}^");
        self.run_bool(&["diff", "--quiet", &first_parent, rev])
    }
}

/// Parse one NUL-separated `git log` record.
fn parse_log_record(record: &str, is_empty: bool) -> Option<Change> {
    let fields: Vec<&str> = record.split('\0').collect();
    if fields.len() != 6 || fields[0].is_empty() {
        return None;
    }
    Some(Change {
        id: fields[0].to_string(),
        short_id: fields[1].to_string(),
        description: fields[2].to_string(),
        author: fields[3].to_string(),
        timestamp: fields[4].parse().unwrap_or(0),
        is_working: false,
        has_conflict: false,
        is_empty,
        parents: fields[5].split_whitespace().map(str::to_string).collect(),
    })
}

fn parse_log_records(output: &str) -> Vec<Change> {
    output
        .lines()
        .filter_map(|line| parse_log_record(line, false))
        .collect()
}

/// Map a porcelain status letter to a [`FileState`].
fn letter_state(letter: u8) -> Option<FileState> {
    Some(match letter {
        b'M' | b'T' => FileState::Modified,
        b'A' => FileState::Added,
        b'D' => FileState::Deleted,
        b'R' => FileState::Renamed,
        b'C' => FileState::Copied,
        b'?' => FileState::Untracked,
        b'!' => FileState::Ignored,
        b'U' => FileState::Conflicted,
        b' ' => FileState::Unmodified,
        _ => return None,
    })
}

/// Parse `git status --porcelain -z` output.
///
/// Records are `XY<space>path` NUL-terminated; rename/copy records carry
/// the original path as an extra NUL-terminated field. `U` in either
/// column (and the AA/DD both-sides cases) marks the entry conflicted.
fn parse_status_z(output: &[u8]) -> Vec<StatusEntry> {
    let mut entries = Vec::new();
    let mut fields = output.split(|&b| b == 0);

    while let Some(record) = fields.next() {
        if record.len() < 4 {
            continue;
        }
        let x = record[0];
        let y = record[1];
        let path = String::from_utf8_lossy(&record[3..]).into_owned();

        let conflicted = x == b'U' || y == b'U' || (x == b'A' && y == b'A') || (x == b'D' && y == b'D');
        let staged = x != b' ' && x != b'?' && x != b'!';
        let state = if conflicted {
            FileState::Conflicted
        } else if staged {
            letter_state(x).unwrap_or(FileState::Modified)
        } else {
            letter_state(y).unwrap_or(FileState::Modified)
        };

        // Rename/copy records are followed by the original path.
        let old_path = if x == b'R' || x == b'C' || y == b'R' || y == b'C' {
            fields
                .next()
                .map(|orig| String::from_utf8_lossy(orig).into_owned())
        } else {
            None
        };

        entries.push(StatusEntry {
            path,
            state,
            staged,
            conflicted,
            old_path,
        });
    }

    entries
}

/// One block of `git worktree list --porcelain` output.
#[derive(Debug, Default, Clone)]
struct WorktreeBlock {
    path: PathBuf,
    head: String,
    branch: Option<String>,
    bare: bool,
}

/// Parse `git worktree list --porcelain`: blank-line-separated blocks of
/// `key value` lines, the first worktree being the main one.
fn parse_worktree_list(output: &str) -> Vec<WorktreeBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<WorktreeBlock> = None;

    for line in output.lines() {
        if line.is_empty() {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            continue;
        }
        let (key, value) = match line.split_once(' ') {
            Some((k, v)) => (k, Some(v)),
            None => (line, None),
        };
        match (key, current.as_mut()) {
            ("worktree", _) => {
                if let Some(block) = current.take() {
                    blocks.push(block);
                }
                current = Some(WorktreeBlock {
                    path: PathBuf::from(value.unwrap_or_default()),
                    ..Default::default()
                });
            }
            ("HEAD", Some(block)) => block.head = value.unwrap_or_default().to_string(),
            ("branch", Some(block)) => {
                let branch_ref = value.unwrap_or_default();
                block.branch = Some(
                    branch_ref
                        .strip_prefix("refs/heads/")
                        .unwrap_or(branch_ref)
                        .to_string(),
                );
            }
            ("bare", Some(block)) => block.bare = true,
            _ => {}
        }
    }
    if let Some(block) = current {
        blocks.push(block);
    }
    blocks
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("(unknown)")
        .to_string()
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("path is not valid UTF-8: {}", path.display()),
        ))
    })
}

impl Vcs for GitBackend {
    fn kind(&self) -> VcsKind {
        VcsKind::Git
    }

    fn repo_root(&self) -> &Path {
        &self.root
    }

    fn is_colocated(&self) -> bool {
        self.colocated
    }

    fn raw(&self, args: &[&str]) -> Result<String> {
        self.run(args)
    }

    fn current_branch(&self) -> Result<Option<String>> {
        let out = self.run(&["branch", "--show-current"])?;
        let name = out.trim();
        Ok((!name.is_empty()).then(|| name.to_string()))
    }

    fn current_change(&self) -> Result<Change> {
        self.change_at("HEAD")
    }

    fn status(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_bytes(&["status", "--porcelain", "-z"])?;
        Ok(parse_status_z(&out))
    }

    fn status_path(&self, path: &Path) -> Result<Vec<StatusEntry>> {
        let out = self.run_bytes(&["status", "--porcelain", "-z", "--", path_arg(path)?])?;
        Ok(parse_status_z(&out))
    }

    fn has_remote(&self) -> Result<bool> {
        let out = self.run(&["remote"])?;
        Ok(!out.trim().is_empty())
    }

    fn get_remote(&self) -> Result<Option<String>> {
        let out = self.run(&["remote"])?;
        let names: Vec<&str> = out.lines().filter(|l| !l.is_empty()).collect();
        Ok(names
            .iter()
            .find(|n| **n == "origin")
            .or_else(|| names.first())
            .map(|n| n.to_string()))
    }

    fn stage(&self, paths: &[&Path]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "--"];
        let path_strs: Vec<&str> = paths.iter().map(|p| path_arg(p)).collect::<Result<_>>()?;
        args.extend_from_slice(&path_strs);
        self.run(&args)?;
        Ok(())
    }

    fn commit(&self, message: &str, opts: &CommitOptions) -> Result<()> {
        let mut args = vec!["commit", "-m", message];
        if opts.amend {
            args.push("--amend");
        }
        if opts.allow_empty {
            args.push("--allow-empty");
        }
        let author_arg;
        if let Some(author) = &opts.author {
            author_arg = format!("--author={author}");
            args.push(&author_arg);
        }
        if opts.no_sign {
            args.push("--no-gpg-sign");
        }
        let path_strs: Vec<&str> = opts
            .paths
            .iter()
            .map(|p| path_arg(p))
            .collect::<Result<_>>()?;
        if !path_strs.is_empty() {
            args.push("--");
            args.extend_from_slice(&path_strs);
        }

        // "nothing to commit" lands on stdout, so inspect both streams.
        let output = self.run_output(&args)?;
        if output.success() {
            return Ok(());
        }
        let stdout = output.stdout_utf8();
        let stderr = output.stderr_utf8();
        if stdout.contains("nothing to commit") || stderr.contains("nothing to commit") {
            return Err(Error::NothingToCommit);
        }
        let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        Err(Error::command_failed(
            "git",
            &owned,
            stderr.trim(),
            output.code(),
        ))
    }

    fn fetch(&self, remote: &str, branch: &str) -> Result<()> {
        self.run(&["fetch", remote, branch])?;
        Ok(())
    }

    fn pull(&self, remote: &str, branch: &str) -> Result<()> {
        self.run(&["pull", remote, branch])?;
        Ok(())
    }

    fn push(&self, remote: &str, branch: &str) -> Result<()> {
        self.run(&["push", remote, branch])?;
        Ok(())
    }

    fn push_with_upstream(&self, remote: &str, branch: &str) -> Result<()> {
        self.run(&["push", "-u", remote, branch])?;
        Ok(())
    }

    fn force_push(&self, remote: &str, branch: &str) -> Result<()> {
        self.run(&["push", "--force-with-lease", remote, branch])?;
        Ok(())
    }

    fn branch_exists(&self, name: &str) -> Result<bool> {
        let refname = format!("refs/heads/{name}");
        let output = self.run_output(&["show-ref", "--verify", "--quiet", &refname])?;
        Ok(output.success())
    }

    fn resolve_ref(&self, expr: &str) -> Result<String> {
        let spec = format!("{expr}^{{commit}}");
        match self.run(&["rev-parse", "--verify", "--quiet", &spec]) {
            Ok(out) if !out.trim().is_empty() => Ok(out.trim().to_string()),
            Ok(_) | Err(Error::CommandFailed { .. }) => Err(Error::BranchNotFound {
                name: expr.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        self.run_bool(&["merge-base", "--is-ancestor", ancestor, descendant])
    }

    fn merge_base(&self, a: &str, b: &str) -> Result<String> {
        let out = self.run(&["merge-base", a, b])?;
        Ok(out.trim().to_string())
    }

    fn rev_list_count(&self, from: &str, to: &str) -> Result<usize> {
        let range = format!("{from}..{to}");
        let out = self.run(&["rev-list", "--count", &range])?;
        out.trim().parse().map_err(|_| {
            Error::command_failed("git", &["rev-list".into()], "unparseable count", None)
        })
    }

    fn log(&self, limit: usize) -> Result<Vec<Change>> {
        let n = format!("-{limit}");
        let out = self.run(&["log", &n, LOG_FORMAT])?;
        Ok(parse_log_records(&out))
    }

    fn log_between(&self, from: &str, to: &str) -> Result<Vec<Change>> {
        let range = format!("{from}..{to}");
        let out = self.run(&["log", LOG_FORMAT, &range])?;
        Ok(parse_log_records(&out))
    }

    fn show(&self, id: &str) -> Result<String> {
        self.run(&["show", id])
    }

    fn diff(&self, from: &str, to: &str) -> Result<String> {
        self.run(&["diff", from, to])
    }

    fn diff_path(&self, from: &str, to: &str, path: &Path) -> Result<String> {
        self.run(&["diff", from, to, "--", path_arg(path)?])
    }

    fn list_branches(&self) -> Result<Vec<BranchInfo>> {
        let out = self.run(&[
            "for-each-ref",
            "--format=%(refname:short)%00%(upstream:short)",
            "refs/heads",
        ])?;
        Ok(out
            .lines()
            .filter_map(|line| {
                let (name, upstream) = line.split_once('\0')?;
                let tracked_remote = upstream
                    .split_once('/')
                    .map(|(remote, _)| remote.to_string());
                Some(BranchInfo {
                    name: name.to_string(),
                    remote: None,
                    tracked_remote,
                })
            })
            .collect())
    }

    fn create_branch(&self, name: &str) -> Result<()> {
        self.run(&["branch", name])?;
        Ok(())
    }

    fn delete_branch(&self, name: &str) -> Result<()> {
        match self.run(&["branch", "-D", name]) {
            Ok(_) => Ok(()),
            Err(Error::CommandFailed { ref stderr, .. }) if stderr.contains("not found") => {
                Err(Error::BranchNotFound {
                    name: name.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn move_branch(&self, name: &str, to: &str) -> Result<()> {
        self.run(&["branch", "-f", name, to])?;
        Ok(())
    }

    fn set_branch(&self, name: &str, to: &str) -> Result<()> {
        // Same as move, but creates the branch when missing.
        self.run(&["branch", "-f", name, to])?;
        Ok(())
    }

    fn track_branch(&self, name: &str, remote: &str) -> Result<()> {
        let upstream = format!("--set-upstream-to={remote}/{name}");
        self.run(&["branch", &upstream, name])?;
        Ok(())
    }

    fn untrack_branch(&self, name: &str, _remote: &str) -> Result<()> {
        self.run(&["branch", "--unset-upstream", name])?;
        Ok(())
    }

    fn switch_branch(&self, name: &str) -> Result<()> {
        self.run(&["switch", name])?;
        Ok(())
    }

    fn list_workspaces(&self) -> Result<Vec<WorkspaceInfo>> {
        let out = self.run(&["worktree", "list", "--porcelain"])?;
        let blocks = parse_worktree_list(&out);
        Ok(blocks
            .into_iter()
            .filter(|b| !b.bare)
            .enumerate()
            .map(|(i, block)| WorkspaceInfo {
                name: block
                    .branch
                    .clone()
                    .unwrap_or_else(|| dir_name(&block.path)),
                path: Some(block.path),
                change_id: block.head,
                // Git lists the main worktree first.
                is_default: i == 0,
            })
            .collect())
    }

    fn create_workspace(&self, name: &str, path: &Path) -> Result<()> {
        match self.run(&["worktree", "add", "-b", name, path_arg(path)?]) {
            Ok(_) => Ok(()),
            Err(Error::CommandFailed { ref stderr, .. }) if stderr.contains("already exists") => {
                Err(Error::WorkspaceExists {
                    name: name.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn remove_workspace(&self, name: &str) -> Result<()> {
        let workspaces = self.list_workspaces()?;
        let Some(ws) = workspaces.iter().find(|w| w.name == name) else {
            return Err(Error::WorkspaceNotFound {
                name: name.to_string(),
            });
        };
        let Some(path) = &ws.path else {
            return Err(Error::WorkspaceNotFound {
                name: name.to_string(),
            });
        };
        self.run(&["worktree", "remove", path_arg(path)?])?;
        Ok(())
    }

    fn update_stale_workspace(&self, _name: &str) -> Result<()> {
        // The staging model has no stale working copies.
        Ok(())
    }

    fn squash(&self, _source: Option<&str>) -> Result<()> {
        // Interpreted as "amend the previous commit, no edit".
        self.run(&["commit", "--amend", "--no-edit"])?;
        Ok(())
    }

    fn new_change(&self, _message: Option<&str>) -> Result<()> {
        // Commits are created by `commit`; there is no editable change.
        Ok(())
    }

    fn edit(&self, id: &str) -> Result<()> {
        self.run(&["checkout", id])?;
        Ok(())
    }

    fn next(&self) -> Result<()> {
        // Walk forward: the first-parent child of HEAD on the current branch.
        let Some(branch) = self.current_branch()? else {
            let head = self.resolve_ref("HEAD")?;
            return Err(Error::BranchNotFound { name: head });
        };
        let range = format!("HEAD..{branch}");
        let out = self.run(&["rev-list", "--ancestry-path", "--first-parent", &range])?;
        // rev-list prints newest first; the last line is the immediate child.
        let Some(child) = out.lines().filter(|l| !l.is_empty()).next_back() else {
            return Ok(());
        };
        self.run(&["checkout", child])?;
        Ok(())
    }

    fn prev(&self) -> Result<()> {
        self.run(&["checkout", "HEAD^"])?;
        Ok(())
    }

    fn track_files(&self, paths: &[&Path]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "--intent-to-add", "--"];
        let path_strs: Vec<&str> = paths.iter().map(|p| path_arg(p)).collect::<Result<_>>()?;
        args.extend_from_slice(&path_strs);
        self.run(&args)?;
        Ok(())
    }

    fn untrack_files(&self, paths: &[&Path]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["rm", "--cached", "--"];
        let path_strs: Vec<&str> = paths.iter().map(|p| path_arg(p)).collect::<Result<_>>()?;
        args.extend_from_slice(&path_strs);
        self.run(&args)?;
        Ok(())
    }

    fn is_file_tracked(&self, path: &Path) -> Result<bool> {
        self.run_bool(&["ls-files", "--error-unmatch", "--", path_arg(path)?])
    }

    fn list_tracked_files(&self, prefix: &Path) -> Result<Vec<String>> {
        let out = self.run_bytes(&["ls-files", "-z", "--", path_arg(prefix)?])?;
        Ok(out
            .split(|&b| b == 0)
            .filter(|s| !s.is_empty())
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect())
    }

    fn check_ignore(&self, path: &Path) -> Result<bool> {
        self.run_bool(&["check-ignore", "-q", "--", path_arg(path)?])
    }

    fn checkout_file(&self, rev: &str, path: &Path) -> Result<()> {
        self.run(&["checkout", rev, "--", path_arg(path)?])?;
        Ok(())
    }

    fn get_file_version(&self, path: &Path, rev: &str) -> Result<Vec<u8>> {
        let spec = format!("{rev}:{}", path_arg(path)?);
        self.run_bytes(&["cat-file", "blob", &spec])
    }

    fn list_files_at(&self, rev: &str, prefix: &Path) -> Result<Vec<String>> {
        let out = self.run_bytes(&[
            "ls-tree",
            "-r",
            "--name-only",
            "-z",
            rev,
            "--",
            path_arg(prefix)?,
        ])?;
        Ok(out
            .split(|&b| b == 0)
            .filter(|s| !s.is_empty())
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect())
    }

    fn restore_file(&self, path: &Path) -> Result<()> {
        self.run(&["restore", "--", path_arg(path)?])?;
        Ok(())
    }

    fn reset_hard(&self, rev: &str) -> Result<()> {
        self.run(&["reset", "--hard", rev])?;
        Ok(())
    }

    fn clean(&self) -> Result<()> {
        self.run(&["clean", "-fd"])?;
        Ok(())
    }

    fn has_merge_conflicts(&self) -> Result<bool> {
        let out = self.run(&["ls-files", "-u"])?;
        Ok(!out.trim().is_empty())
    }

    fn get_conflicts(&self) -> Result<Vec<ConflictRecord>> {
        let out = self.run_bytes(&["diff", "--name-only", "--diff-filter=U", "-z"])?;
        Ok(out
            .split(|&b| b == 0)
            .filter(|s| !s.is_empty())
            .map(|s| ConflictRecord {
                path: String::from_utf8_lossy(s).into_owned(),
            })
            .collect())
    }

    fn mark_resolved(&self, path: &Path) -> Result<()> {
        self.run(&["add", "--", path_arg(path)?])?;
        Ok(())
    }

    fn merge(&self, branch: &str, message: &str) -> Result<()> {
        let args = ["merge", "-m", message, branch];
        let output = self.run_output(&args)?;
        if output.success() {
            return Ok(());
        }
        // Conflict announcements land on stdout.
        let stdout = output.stdout_utf8();
        if stdout.contains("CONFLICT") || self.has_merge_conflicts()? {
            let paths = self.get_conflicts()?.into_iter().map(|c| c.path).collect();
            return Err(Error::MergeConflict { paths });
        }
        let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        Err(Error::command_failed(
            "git",
            &owned,
            output.stderr_utf8().trim(),
            output.code(),
        ))
    }

    fn is_merging(&self) -> Result<bool> {
        Ok(self.get_common_dir()?.join("MERGE_HEAD").exists())
    }

    fn rebase(&self, onto: &str) -> Result<()> {
        self.run(&["rebase", onto])?;
        Ok(())
    }

    fn rebase_abort(&self) -> Result<()> {
        self.run(&["rebase", "--abort"])?;
        Ok(())
    }

    fn get_config(&self, key: &str) -> Result<Option<String>> {
        let output = self.run_output(&["config", "--get", key])?;
        if output.success() {
            Ok(Some(output.stdout_utf8().trim_end().to_string()))
        } else if output.code() == Some(1) {
            // Exit 1 means the key is unset.
            Ok(None)
        } else {
            Err(Error::command_failed(
                "git",
                &["config".into(), "--get".into(), key.into()],
                output.stderr_utf8().trim(),
                output.code(),
            ))
        }
    }

    fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.run(&["config", key, value])?;
        Ok(())
    }

    fn get_remote_url(&self, remote: &str) -> Result<Option<String>> {
        match self.run(&["remote", "get-url", remote]) {
            Ok(out) => Ok(Some(out.trim().to_string())),
            Err(Error::CommandFailed { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn configure_hooks_path(&self, path: &Path) -> Result<()> {
        self.set_config("core.hooksPath", path_arg(path)?)
    }

    fn get_hooks_path(&self) -> Result<Option<String>> {
        self.get_config("core.hooksPath")
    }

    fn configure_merge_driver(&self, command: &str, name: &str) -> Result<()> {
        self.set_config(&format!("merge.{name}.driver"), command)?;
        self.set_config(&format!("merge.{name}.name"), &format!("{name} merge driver"))
    }

    fn get_upstream(&self) -> Result<Option<String>> {
        let output = self.run_output(&[
            "rev-parse",
            "--abbrev-ref",
            "--symbolic-full-name",
            "@{u}",
        ])?;
        if output.success() {
            Ok(Some(output.stdout_utf8().trim().to_string()))
        } else {
            Ok(None)
        }
    }

    fn get_common_dir(&self) -> Result<PathBuf> {
        let out = self.run(&["rev-parse", "--git-common-dir"])?;
        let dir = PathBuf::from(out.trim());
        if dir.is_absolute() {
            Ok(dir)
        } else {
            Ok(self.root.join(dir))
        }
    }

    fn stack_info(&self) -> Result<Vec<Change>> {
        if let Some(upstream) = self.get_upstream()? {
            let range = format!("{upstream}..HEAD");
            let out = self.run(&["log", LOG_FORMAT, &range])?;
            return Ok(parse_log_records(&out));
        }
        self.log(10)
    }
}
