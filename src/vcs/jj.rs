//! Jujutsu (jj) implementation of the [`Vcs`] trait.
//!
//! Every operation shells out to `jj` with `cwd` set to the workspace root.
//! Output that needs structured parsing goes through templates whose fields
//! are NUL-separated (`"\0"` is a jj string escape), so parsing is
//! unambiguous regardless of locale or description contents.
//!
//! Two policies live in the command wrapper rather than in individual
//! operations:
//!
//! - **Stale retry**: any invocation whose stderr reports a stale working
//!   copy runs `jj workspace update-stale`, invokes the registered repair
//!   hook (the store uses this to re-materialize dirty writes the refresh
//!   clobbered), then retries exactly once.
//! - **Immutability override**: mutations that must touch the pinned
//!   side-channel pass a one-shot `--config` clearing the
//!   `immutable_heads()` alias.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::exec::{CancelToken, Cmd, CmdOutput};

use super::{
    BranchInfo, Change, CommitOptions, ConflictRecord, FileState, StatusEntry, Vcs, VcsKind,
    WorkspaceInfo,
};

/// Backend binary name.
pub const JJ_BIN: &str = "jj";

/// One-shot config override that makes `immutable_heads()` empty for a
/// single invocation, letting this process move the pinned side-channel.
pub const IMMUTABLE_OVERRIDE: &str = r#"revset-aliases."immutable_heads()"=none()"#;

/// Repo-local config key for the immutability alias.
pub const IMMUTABLE_ALIAS_KEY: &str = r#"revset-aliases."immutable_heads()""#;

/// Template for a single change: full description, NUL-separated fields,
/// no record terminator.
const CHANGE_TEMPLATE: &str = r#"change_id ++ "\0" ++ change_id.short(8) ++ "\0" ++ description ++ "\0" ++ author.email() ++ "\0" ++ committer.timestamp().utc().format("%s") ++ "\0" ++ if(current_working_copy, "1", "0") ++ "\0" ++ if(conflict, "1", "0") ++ "\0" ++ if(empty, "1", "0") ++ "\0" ++ parents.map(|c| c.change_id()).join(" ")"#;

/// Template for multi-change listings: first description line only,
/// LF-terminated records.
const LOG_TEMPLATE: &str = r#"change_id ++ "\0" ++ change_id.short(8) ++ "\0" ++ description.first_line() ++ "\0" ++ author.email() ++ "\0" ++ committer.timestamp().utc().format("%s") ++ "\0" ++ if(current_working_copy, "1", "0") ++ "\0" ++ if(conflict, "1", "0") ++ "\0" ++ if(empty, "1", "0") ++ "\0" ++ parents.map(|c| c.change_id()).join(" ") ++ "\n""#;

type RepairHook = Arc<dyn Fn() + Send + Sync>;

/// Jujutsu-backed [`Vcs`] handle, bound to one workspace root.
#[derive(Clone)]
pub struct JjBackend {
    root: PathBuf,
    colocated: bool,
    cancel: CancelToken,
    repair_hook: Arc<Mutex<Option<RepairHook>>>,
}

impl std::fmt::Debug for JjBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JjBackend")
            .field("root", &self.root)
            .field("colocated", &self.colocated)
            .finish_non_exhaustive()
    }
}

impl JjBackend {
    /// Open a handle at a workspace root (the directory containing `.jj`).
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        if !root.join(".jj").exists() {
            return Err(Error::NotInRepo { path: root });
        }
        let colocated = root.join(".git").exists();
        Ok(Self {
            root,
            colocated,
            cancel: CancelToken::never(),
            repair_hook: Arc::new(Mutex::new(None)),
        })
    }

    /// A handle sharing this one's repair hook but carrying `token`.
    pub fn with_cancel_token(&self, token: CancelToken) -> Self {
        let mut clone = self.clone();
        clone.cancel = token;
        clone
    }

    /// Install the hook run between `workspace update-stale` and a stale
    /// retry. The store registers its dirty-file restore here so pending
    /// writes survive the refresh.
    pub fn set_repair_hook(&self, hook: Option<RepairHook>) {
        *self.repair_hook.lock().expect("repair hook lock poisoned") = hook;
    }

    fn invoke_repair_hook(&self) {
        let hook = self
            .repair_hook
            .lock()
            .expect("repair hook lock poisoned")
            .clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Spawn `jj` with the given args; no exit-status mapping.
    fn run_output(&self, args: &[&str]) -> Result<CmdOutput> {
        Cmd::new(JJ_BIN)
            .args(["--no-pager", "--color", "never"])
            .args(args.iter().copied())
            .current_dir(&self.root)
            .cancel_token(self.cancel.clone())
            .output()
    }

    fn map_failure(args: &[&str], output: CmdOutput) -> Result<CmdOutput> {
        if output.success() {
            Ok(output)
        } else {
            let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
            Err(Error::command_failed(
                "jj",
                &owned,
                output.stderr_utf8().trim(),
                output.code(),
            ))
        }
    }

    fn run_once_output(&self, args: &[&str]) -> Result<CmdOutput> {
        let output = self.run_output(args)?;
        Self::map_failure(args, output)
    }

    /// Run with the wrapper-level stale retry. The retry path runs
    /// `workspace update-stale` and the repair hook, then re-invokes once;
    /// it never recurses.
    fn run_raw(&self, args: &[&str]) -> Result<CmdOutput> {
        match self.run_once_output(args) {
            Err(Error::CommandFailed { ref stderr, .. })
                if stderr_indicates_stale(stderr) && args.first() != Some(&"workspace") =>
            {
                log::debug!("stale working copy detected, refreshing and retrying: jj {args:?}");
                if let Err(e) = self.run_once_output(&["workspace", "update-stale"]) {
                    log::warn!("workspace update-stale failed: {e}");
                }
                self.invoke_repair_hook();
                self.run_once_output(args)
            }
            other => other,
        }
    }

    /// Run, returning stdout as a string.
    pub(crate) fn run(&self, args: &[&str]) -> Result<String> {
        Ok(self.run_raw(args)?.stdout_utf8())
    }

    /// Run, returning stdout bytes (for file contents).
    fn run_bytes(&self, args: &[&str]) -> Result<Vec<u8>> {
        Ok(self.run_raw(args)?.stdout)
    }

    /// Run a mutation with the one-shot immutability override prepended.
    pub(crate) fn run_with_override(&self, args: &[&str]) -> Result<String> {
        let mut full = vec!["--config", IMMUTABLE_OVERRIDE];
        full.extend_from_slice(args);
        self.run(&full)
    }

    /// `jj describe -m <message>` on a revision.
    pub(crate) fn describe(&self, rev: &str, message: &str) -> Result<()> {
        self.run(&["describe", "-r", rev, "-m", message])?;
        Ok(())
    }

    /// Create a new working-copy change with the given parent revsets.
    pub(crate) fn new_with_parents(&self, parents: &[&str], message: Option<&str>) -> Result<()> {
        let mut args = vec!["new"];
        args.extend_from_slice(parents);
        if let Some(msg) = message {
            args.push("-m");
            args.push(msg);
        }
        self.run(&args)?;
        Ok(())
    }

    /// Change details for an arbitrary revset expression.
    pub(crate) fn change_at(&self, rev: &str) -> Result<Change> {
        let out = self.run(&[
            "log",
            "-r",
            rev,
            "--no-graph",
            "--limit",
            "1",
            "-T",
            CHANGE_TEMPLATE,
        ])?;
        parse_change_record(&out).ok_or_else(|| Error::BranchNotFound {
            name: rev.to_string(),
        })
    }

    /// Round-trip changes into the colocated git repository. No-op when the
    /// repository is not colocated.
    pub fn git_export(&self) -> Result<()> {
        if !self.colocated {
            return Ok(());
        }
        self.run(&["git", "export"])?;
        Ok(())
    }

    /// Import refs from the colocated git repository. No-op when the
    /// repository is not colocated.
    pub fn git_import(&self) -> Result<()> {
        if !self.colocated {
            return Ok(());
        }
        self.run(&["git", "import"])?;
        Ok(())
    }

    fn remotes(&self) -> Result<Vec<(String, String)>> {
        let out = self.run(&["git", "remote", "list"])?;
        Ok(out
            .lines()
            .filter_map(|line| {
                let (name, url) = line.split_once(' ')?;
                Some((name.to_string(), url.trim().to_string()))
            })
            .collect())
    }
}

/// Whether stderr reports a stale working copy.
///
/// Anchored to line starts (after jj's `Error: ` prefix) so unrelated
/// diagnostics that merely mention the words do not trigger a retry.
pub(crate) fn stderr_indicates_stale(stderr: &str) -> bool {
    stderr.lines().any(|line| {
        let line = line.trim_start();
        let line = line.strip_prefix("Error: ").unwrap_or(line);
        line.starts_with("The working copy is stale")
            || line.starts_with("working copy is stale")
    })
}

/// Whether a failed squash actually means "there was nothing to move".
pub(crate) fn reports_nothing_changed(text: &str) -> bool {
    text.lines().any(|l| l.trim() == "Nothing changed.")
        || text.to_lowercase().contains("no changes to squash")
}

/// Parse one NUL-separated change record.
fn parse_change_record(record: &str) -> Option<Change> {
    let record = record.strip_suffix('\n').unwrap_or(record);
    let fields: Vec<&str> = record.split('\0').collect();
    if fields.len() != 9 || fields[0].is_empty() {
        return None;
    }
    Some(Change {
        id: fields[0].to_string(),
        short_id: fields[1].to_string(),
        description: fields[2].to_string(),
        author: fields[3].to_string(),
        timestamp: fields[4].parse().unwrap_or(0),
        is_working: fields[5] == "1",
        has_conflict: fields[6] == "1",
        is_empty: fields[7] == "1",
        parents: fields[8].split_whitespace().map(str::to_string).collect(),
    })
}

/// Parse LF-separated change records.
fn parse_change_records(output: &str) -> Vec<Change> {
    output.lines().filter_map(parse_change_record).collect()
}

/// Parse `jj diff --summary` output: one `{letter} {path}` line per entry.
///
/// Every entry is `staged` because jj auto-snapshots the working copy.
fn parse_diff_summary(output: &str) -> Vec<StatusEntry> {
    output
        .lines()
        .filter_map(|line| {
            let (letter, rest) = line.split_once(' ')?;
            let state = match letter {
                "M" => FileState::Modified,
                "A" => FileState::Added,
                "D" => FileState::Deleted,
                "R" => FileState::Renamed,
                "C" => FileState::Copied,
                _ => return None,
            };
            let (path, old_path) = match state {
                FileState::Renamed | FileState::Copied => expand_rename(rest),
                _ => (rest.to_string(), None),
            };
            Some(StatusEntry {
                path,
                state,
                staged: true,
                conflicted: false,
                old_path,
            })
        })
        .collect()
}

/// Expand jj's collapsed rename notation.
///
/// `common/{old => new}/tail` becomes `(common/new/tail, Some(common/old/tail))`;
/// a plain `old => new` (no braces) is split on the arrow. Anything else is
/// returned as-is with no old path.
fn expand_rename(text: &str) -> (String, Option<String>) {
    if let Some(open) = text.find('{')
        && let Some(close) = text[open..].find('}').map(|i| open + i)
        && let Some((before, after)) = text[open + 1..close].split_once(" => ")
    {
        let prefix = &text[..open];
        let suffix = &text[close + 1..];
        let new = format!("{prefix}{after}{suffix}");
        let old = format!("{prefix}{before}{suffix}");
        return (new, Some(old));
    }
    if let Some((old, new)) = text.split_once(" => ") {
        return (new.to_string(), Some(old.to_string()));
    }
    (text.to_string(), None)
}

/// Extract the path column from one `jj resolve --list` line.
fn parse_resolve_list_line(line: &str) -> Option<String> {
    let line = line.trim_end();
    if line.is_empty() {
        return None;
    }
    // Path and conflict description are separated by a run of spaces.
    let path = match line.find("  ") {
        Some(idx) => &line[..idx],
        None => line.split_whitespace().next()?,
    };
    Some(path.to_string())
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("path is not valid UTF-8: {}", path.display()),
        ))
    })
}

impl Vcs for JjBackend {
    fn kind(&self) -> VcsKind {
        VcsKind::Jj
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
        let out = self.run(&[
            "log",
            "-r",
            "@",
            "--no-graph",
            "-T",
            r#"bookmarks.join(" ")"#,
        ])?;
        Ok(out.split_whitespace().next().map(|s| {
            // A conflicted bookmark renders with a trailing marker.
            s.trim_end_matches("??").to_string()
        }))
    }

    fn current_change(&self) -> Result<Change> {
        self.change_at("@")
    }

    fn status(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run(&["diff", "--summary"])?;
        Ok(parse_diff_summary(&out))
    }

    fn status_path(&self, path: &Path) -> Result<Vec<StatusEntry>> {
        let out = self.run(&["diff", "--summary", path_arg(path)?])?;
        Ok(parse_diff_summary(&out))
    }

    fn has_remote(&self) -> Result<bool> {
        Ok(!self.remotes()?.is_empty())
    }

    fn get_remote(&self) -> Result<Option<String>> {
        let remotes = self.remotes()?;
        Ok(remotes
            .iter()
            .find(|(name, _)| name == "origin")
            .or_else(|| remotes.first())
            .map(|(name, _)| name.clone()))
    }

    fn stage(&self, paths: &[&Path]) -> Result<()> {
        // Opportunistic track: jj snapshots automatically, so this only
        // matters for paths excluded by auto-track settings.
        for path in paths {
            if self.root.join(path).exists() {
                self.run(&["file", "track", path_arg(path)?])?;
            }
        }
        Ok(())
    }

    fn commit(&self, message: &str, opts: &CommitOptions) -> Result<()> {
        if opts.amend {
            // Fold the working change into its parent, keeping the parent's
            // description (avoids an interactive editor).
            let mut args = vec!["squash", "-u"];
            let path_strs: Vec<&str> = opts
                .paths
                .iter()
                .map(|p| path_arg(p))
                .collect::<Result<_>>()?;
            args.extend_from_slice(&path_strs);
            self.run(&args)?;
            return Ok(());
        }

        let mut args = vec!["commit", "-m", message];
        if let Some(author) = &opts.author {
            args.push("--author");
            args.push(author);
        }
        let path_strs: Vec<&str> = opts
            .paths
            .iter()
            .map(|p| path_arg(p))
            .collect::<Result<_>>()?;
        args.extend_from_slice(&path_strs);
        self.run(&args)?;
        Ok(())
    }

    fn fetch(&self, remote: &str, branch: &str) -> Result<()> {
        self.run(&["git", "fetch", "--remote", remote, "--branch", branch])?;
        Ok(())
    }

    fn pull(&self, remote: &str, branch: &str) -> Result<()> {
        // jj has no pull; fetched changes are integrated by revset, not by
        // merging into a checked-out branch.
        self.fetch(remote, branch)
    }

    fn push(&self, remote: &str, branch: &str) -> Result<()> {
        self.run(&["git", "push", "--remote", remote, "--bookmark", branch])?;
        Ok(())
    }

    fn push_with_upstream(&self, remote: &str, branch: &str) -> Result<()> {
        self.run(&[
            "git",
            "push",
            "--remote",
            remote,
            "--bookmark",
            branch,
            "--allow-new",
        ])?;
        Ok(())
    }

    fn force_push(&self, remote: &str, branch: &str) -> Result<()> {
        // Bookmark positions are authoritative in jj's push model; pushing
        // with --allow-new is as forceful as the backend gets.
        self.push_with_upstream(remote, branch)
    }

    fn branch_exists(&self, name: &str) -> Result<bool> {
        match self.resolve_ref(name) {
            Ok(_) => Ok(true),
            Err(Error::CommandFailed { .. }) | Err(Error::BranchNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn resolve_ref(&self, expr: &str) -> Result<String> {
        let out = self.run(&[
            "log",
            "-r",
            expr,
            "--no-graph",
            "--limit",
            "1",
            "-T",
            r#"change_id ++ "\n""#,
        ])?;
        match out.lines().next() {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => Err(Error::BranchNotFound {
                name: expr.to_string(),
            }),
        }
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let revset = format!("({ancestor}) & ::({descendant})");
        match self.run(&["log", "-r", &revset, "--no-graph", "-T", r#""x""#]) {
            Ok(out) => Ok(!out.trim().is_empty()),
            Err(Error::CommandFailed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn merge_base(&self, a: &str, b: &str) -> Result<String> {
        self.resolve_ref(&format!("heads(::({a}) & ::({b}))"))
    }

    fn rev_list_count(&self, from: &str, to: &str) -> Result<usize> {
        let revset = format!("({from})..({to})");
        let out = self.run(&["log", "-r", &revset, "--no-graph", "-T", r#""x\n""#])?;
        Ok(out.lines().filter(|l| !l.is_empty()).count())
    }

    fn log(&self, limit: usize) -> Result<Vec<Change>> {
        let limit = limit.to_string();
        let out = self.run(&[
            "log",
            "-r",
            "::@",
            "--no-graph",
            "--limit",
            &limit,
            "-T",
            LOG_TEMPLATE,
        ])?;
        Ok(parse_change_records(&out))
    }

    fn log_between(&self, from: &str, to: &str) -> Result<Vec<Change>> {
        let revset = format!("({from})..({to})");
        let out = self.run(&["log", "-r", &revset, "--no-graph", "-T", LOG_TEMPLATE])?;
        Ok(parse_change_records(&out))
    }

    fn show(&self, id: &str) -> Result<String> {
        self.run(&["show", id])
    }

    fn diff(&self, from: &str, to: &str) -> Result<String> {
        self.run(&["diff", "--from", from, "--to", to, "--git"])
    }

    fn diff_path(&self, from: &str, to: &str, path: &Path) -> Result<String> {
        self.run(&["diff", "--from", from, "--to", to, "--git", path_arg(path)?])
    }

    fn list_branches(&self) -> Result<Vec<BranchInfo>> {
        let locals = self.run(&["bookmark", "list", "-T", r#"name ++ "\n""#])?;

        // Tracked remote bookmarks, to fill in tracked_remote on locals.
        let tracked = self
            .run(&[
                "bookmark",
                "list",
                "--tracked",
                "-T",
                r#"name ++ "\0" ++ remote ++ "\n""#,
            ])
            .unwrap_or_default();
        let tracked_pairs: Vec<(String, String)> = tracked
            .lines()
            .filter_map(|line| {
                let (name, remote) = line.split_once('\0')?;
                if remote.is_empty() {
                    None
                } else {
                    Some((name.to_string(), remote.to_string()))
                }
            })
            .collect();

        Ok(locals
            .lines()
            .filter(|l| !l.is_empty())
            .map(|name| BranchInfo {
                name: name.to_string(),
                remote: None,
                tracked_remote: tracked_pairs
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, r)| r.clone()),
            })
            .collect())
    }

    fn create_branch(&self, name: &str) -> Result<()> {
        self.run(&["bookmark", "create", name, "-r", "@"])?;
        Ok(())
    }

    fn delete_branch(&self, name: &str) -> Result<()> {
        match self.run(&["bookmark", "delete", name]) {
            Ok(_) => Ok(()),
            Err(Error::CommandFailed { ref stderr, .. }) if stderr.contains("No such bookmark") => {
                Err(Error::BranchNotFound {
                    name: name.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn move_branch(&self, name: &str, to: &str) -> Result<()> {
        self.run(&["bookmark", "move", name, "--to", to])?;
        Ok(())
    }

    fn set_branch(&self, name: &str, to: &str) -> Result<()> {
        self.run(&["bookmark", "set", name, "-r", to, "--allow-backwards"])?;
        Ok(())
    }

    fn track_branch(&self, name: &str, remote: &str) -> Result<()> {
        let spec = format!("{name}@{remote}");
        self.run(&["bookmark", "track", &spec])?;
        Ok(())
    }

    fn untrack_branch(&self, name: &str, remote: &str) -> Result<()> {
        let spec = format!("{name}@{remote}");
        self.run(&["bookmark", "untrack", &spec])?;
        Ok(())
    }

    fn switch_branch(&self, name: &str) -> Result<()> {
        self.run(&["edit", name])?;
        Ok(())
    }

    fn list_workspaces(&self) -> Result<Vec<WorkspaceInfo>> {
        let out = self.run(&[
            "workspace",
            "list",
            "-T",
            r#"name ++ "\0" ++ target.change_id() ++ "\n""#,
        ])?;
        let current = self.current_change().map(|c| c.id).unwrap_or_default();

        Ok(out
            .lines()
            .filter_map(|line| {
                let (name, change_id) = line.split_once('\0')?;
                // jj does not record workspace paths; only our own is known.
                let path = (change_id == current).then(|| self.root.clone());
                Some(WorkspaceInfo {
                    name: name.to_string(),
                    path,
                    change_id: change_id.to_string(),
                    is_default: name == "default",
                })
            })
            .collect())
    }

    fn create_workspace(&self, name: &str, path: &Path) -> Result<()> {
        match self.run(&["workspace", "add", "--name", name, path_arg(path)?]) {
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
        match self.run(&["workspace", "forget", name]) {
            Ok(_) => Ok(()),
            Err(Error::CommandFailed { ref stderr, .. })
                if stderr.contains("No such workspace") =>
            {
                Err(Error::WorkspaceNotFound {
                    name: name.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn update_stale_workspace(&self, name: &str) -> Result<()> {
        // Operates on the workspace this handle is bound to; jj addresses
        // the stale working copy by cwd, not by name.
        log::debug!("updating stale working copy (workspace '{name}')");
        self.run_once_output(&["workspace", "update-stale"])?;
        Ok(())
    }

    fn squash(&self, source: Option<&str>) -> Result<()> {
        // -u keeps the destination description, so squash never drops into
        // an interactive editor.
        let mut args = vec!["squash", "-u"];
        if let Some(rev) = source {
            args.push("-r");
            args.push(rev);
        }
        self.run(&args)?;
        Ok(())
    }

    fn new_change(&self, message: Option<&str>) -> Result<()> {
        let mut args = vec!["new"];
        if let Some(msg) = message {
            args.push("-m");
            args.push(msg);
        }
        self.run(&args)?;
        Ok(())
    }

    fn edit(&self, id: &str) -> Result<()> {
        self.run(&["edit", id])?;
        Ok(())
    }

    fn next(&self) -> Result<()> {
        self.run(&["next", "--edit"])?;
        Ok(())
    }

    fn prev(&self) -> Result<()> {
        self.run(&["prev", "--edit"])?;
        Ok(())
    }

    fn track_files(&self, paths: &[&Path]) -> Result<()> {
        for path in paths {
            self.run(&["file", "track", path_arg(path)?])?;
        }
        Ok(())
    }

    fn untrack_files(&self, paths: &[&Path]) -> Result<()> {
        for path in paths {
            self.run(&["file", "untrack", path_arg(path)?])?;
        }
        Ok(())
    }

    fn is_file_tracked(&self, path: &Path) -> Result<bool> {
        let out = self.run(&["file", "list", path_arg(path)?])?;
        Ok(!out.trim().is_empty())
    }

    fn list_tracked_files(&self, prefix: &Path) -> Result<Vec<String>> {
        let out = self.run(&["file", "list", path_arg(prefix)?])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    fn check_ignore(&self, _path: &Path) -> Result<bool> {
        // jj has no untracked files and no ignore query command.
        Err(Error::NotSupported {
            operation: "check_ignore",
            backend: "jj",
        })
    }

    fn checkout_file(&self, rev: &str, path: &Path) -> Result<()> {
        self.run(&["restore", "--from", rev, path_arg(path)?])?;
        Ok(())
    }

    fn get_file_version(&self, path: &Path, rev: &str) -> Result<Vec<u8>> {
        self.run_bytes(&["file", "show", "-r", rev, path_arg(path)?])
    }

    fn list_files_at(&self, rev: &str, prefix: &Path) -> Result<Vec<String>> {
        let out = self.run(&["file", "list", "-r", rev, path_arg(prefix)?])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    fn restore_file(&self, path: &Path) -> Result<()> {
        self.run(&["restore", path_arg(path)?])?;
        Ok(())
    }

    fn reset_hard(&self, rev: &str) -> Result<()> {
        self.run(&["restore", "--from", rev])?;
        Ok(())
    }

    fn clean(&self) -> Result<()> {
        // Untracked files do not exist in the snapshot model.
        Ok(())
    }

    fn has_merge_conflicts(&self) -> Result<bool> {
        Ok(self.current_change()?.has_conflict)
    }

    fn get_conflicts(&self) -> Result<Vec<ConflictRecord>> {
        match self.run(&["resolve", "--list"]) {
            Ok(out) => Ok(out
                .lines()
                .filter_map(parse_resolve_list_line)
                .map(|path| ConflictRecord { path })
                .collect()),
            Err(Error::CommandFailed { ref stderr, .. })
                if stderr.to_lowercase().contains("no conflicts") =>
            {
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn mark_resolved(&self, _path: &Path) -> Result<()> {
        // Conflicts resolve themselves when the markers are edited out;
        // the next snapshot picks that up.
        Ok(())
    }

    fn merge(&self, branch: &str, message: &str) -> Result<()> {
        self.run(&["new", "@", branch, "-m", message])?;
        Ok(())
    }

    fn is_merging(&self) -> Result<bool> {
        // No merge-in-progress state: conflicts are recorded inline.
        Ok(false)
    }

    fn rebase(&self, onto: &str) -> Result<()> {
        self.run(&["rebase", "-d", onto])?;
        Ok(())
    }

    fn rebase_abort(&self) -> Result<()> {
        // Rebase either completes or records conflicts; undo the operation.
        self.run(&["undo"])?;
        Ok(())
    }

    fn get_config(&self, key: &str) -> Result<Option<String>> {
        match self.run(&["config", "get", key]) {
            Ok(out) => Ok(Some(out.trim_end().to_string())),
            Err(Error::CommandFailed { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.run(&["config", "set", "--repo", key, value])?;
        Ok(())
    }

    fn get_remote_url(&self, remote: &str) -> Result<Option<String>> {
        Ok(self
            .remotes()?
            .into_iter()
            .find(|(name, _)| name == remote)
            .map(|(_, url)| url))
    }

    fn configure_hooks_path(&self, _path: &Path) -> Result<()> {
        Err(Error::NotSupported {
            operation: "configure_hooks_path",
            backend: "jj",
        })
    }

    fn get_hooks_path(&self) -> Result<Option<String>> {
        Ok(None)
    }

    fn configure_merge_driver(&self, command: &str, name: &str) -> Result<()> {
        self.set_config(&format!("merge-tools.{name}.program"), command)
    }

    fn get_upstream(&self) -> Result<Option<String>> {
        let Some(branch) = self.current_branch()? else {
            return Ok(None);
        };
        let tracked = self
            .list_branches()?
            .into_iter()
            .find(|b| b.name == branch)
            .and_then(|b| b.tracked_remote);
        Ok(tracked.map(|remote| format!("{remote}/{branch}")))
    }

    fn get_common_dir(&self) -> Result<PathBuf> {
        let repo = self.root.join(".jj").join("repo");
        if repo.is_dir() {
            return Ok(repo);
        }
        if repo.is_file() {
            // Secondary workspaces store a pointer to the primary repo dir.
            let target = std::fs::read_to_string(&repo)?;
            return Ok(PathBuf::from(target.trim()));
        }
        Err(Error::NotInRepo {
            path: self.root.clone(),
        })
    }

    fn stack_info(&self) -> Result<Vec<Change>> {
        match self.run(&["log", "-r", "mutable()", "--no-graph", "-T", LOG_TEMPLATE]) {
            Ok(out) => Ok(parse_change_records(&out)),
            Err(Error::CommandFailed { .. }) => {
                let out = self.run(&[
                    "log",
                    "-r",
                    "::@",
                    "--no-graph",
                    "--limit",
                    "10",
                    "-T",
                    LOG_TEMPLATE,
                ])?;
                Ok(parse_change_records(&out))
            }
            Err(e) => Err(e),
        }
    }
}
