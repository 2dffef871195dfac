//! The wong-db store: issue records on an immutable side-channel revision.
//!
//! Issue records live as JSON files under `.wong/` in the working copy.
//! Durability comes from [`Store::sync`]: the working copy's `.wong/`
//! subtree is squashed into the change pinned by the `wong-db` bookmark,
//! which repo-local configuration declares immutable. Every mutation of
//! the side-channel by this crate passes a one-shot config override; no
//! external tool can move it without that override.
//!
//! Writes are tracked in a dirty map owned by the store instance. The map
//! is the authoritative copy of any write that has not been squashed yet:
//! a stale-refresh of the working copy may clobber the on-disk files, and
//! the dirty map is what puts them back (see the repair hook installed on
//! the jj command wrapper).

mod lock;

pub use lock::SyncLock;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::exec::CancelToken;
use crate::vcs::detect::Context;
use crate::vcs::jj::{IMMUTABLE_ALIAS_KEY, JjBackend, reports_nothing_changed};
use crate::vcs::Vcs;

/// Directory at the repository root holding all store files.
pub const WONG_DIR: &str = ".wong";

/// Bookmark pinning the side-channel change.
pub const BOOKMARK: &str = "wong-db";

/// Lock file name under the VCS common dir.
pub const SYNC_LOCK_FILE: &str = "wong-sync.lock";

const CONFIG_FILE: &str = "config.json";
const METADATA_FILE: &str = "metadata.json";
const ISSUES_DIR: &str = "issues";

/// Description given to the side-channel holder change.
const SIDE_CHANNEL_DESCRIPTION: &str = "wong-db: issue store side channel";

/// How `sync` writes the side-channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryMode {
    /// Rewrite the single side-channel change in place.
    #[default]
    Squash,
    /// Append a new child change per sync, moving the bookmark forward.
    Chain,
}

/// Contents of `.wong/config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub prefix: String,
    pub history_mode: HistoryMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            prefix: "wong".to_string(),
            history_mode: HistoryMode::Squash,
        }
    }
}

/// Contents of `.wong/metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub version: u32,
    pub backend: String,
    pub created_at: String,
}

impl StoreMetadata {
    fn new() -> Self {
        Self {
            version: 1,
            backend: "dag-native".to_string(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Reject ids that could escape `.wong/issues/`.
///
/// Empty ids, `.`, anything containing a separator or `..` are refused.
/// A leading dot is fine. Paths are only ever built from an id after this
/// check passes, and always with `Path::join`, never string concatenation.
pub fn validate_issue_id(id: &str) -> Result<()> {
    let reason = if id.is_empty() {
        "id is empty"
    } else if id == "." {
        "id is the current-directory name"
    } else if id.contains('/') || id.contains('\\') {
        "contains a path separator"
    } else if id.contains("..") {
        "contains a parent-directory sequence"
    } else {
        return Ok(());
    };
    Err(Error::InvalidIssueId {
        id: id.to_string(),
        reason,
    })
}

/// Repo-relative path of an issue record. Call after validation.
fn issue_rel_path(id: &str) -> PathBuf {
    Path::new(WONG_DIR).join(ISSUES_DIR).join(format!("{id}.json"))
}

type DirtyMap = Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>;

/// Handle on the wong-db store of one workspace.
pub struct Store {
    jj: Arc<JjBackend>,
    root: PathBuf,
    dirty: DirtyMap,
    cancel: CancelToken,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open the store of a discovered repository.
    ///
    /// The repository must use the jj backend; the store's durability model
    /// is built on stable change IDs and squash.
    pub fn open(ctx: &Context) -> Result<Self> {
        let Some(jj) = ctx.jj() else {
            return Err(Error::NotSupported {
                operation: "wong store",
                backend: ctx.kind().as_str(),
            });
        };

        let dirty: DirtyMap = Arc::new(Mutex::new(HashMap::new()));
        let store = Self {
            jj: jj.clone(),
            root: ctx.root().to_path_buf(),
            dirty: dirty.clone(),
            cancel: CancelToken::never(),
        };

        // Stale refreshes clobber working-copy files; the wrapper calls
        // back here so pending writes win.
        let hook_root = store.root.clone();
        jj.set_repair_hook(Some(Arc::new(move || {
            restore_dirty_files(&hook_root, &dirty);
        })));

        Ok(store)
    }

    /// Discover the repository containing `path` and open its store.
    pub fn discover(path: &Path) -> Result<Self> {
        let ctx = Context::discover(path)?;
        Self::open(&ctx)
    }

    /// A handle on the same store carrying `token`. The dirty map is
    /// shared: writes through either handle flush on either's sync.
    pub fn with_cancel_token(&self, token: CancelToken) -> Self {
        Self {
            jj: Arc::new(self.jj.with_cancel_token(token.clone())),
            root: self.root.clone(),
            dirty: self.dirty.clone(),
            cancel: token,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn jj(&self) -> &Arc<JjBackend> {
        &self.jj
    }

    // ====== Initialization ======

    /// Create the side-channel revision and bookmark. Idempotent.
    ///
    /// Post-state: the bookmark points at a change whose tree holds only
    /// `.wong/` files, declared immutable in repo-local config, and the
    /// working change has the side-channel as a parent so the working copy
    /// sees `.wong/`.
    pub fn init(&self) -> Result<()> {
        if self.jj.branch_exists(BOOKMARK)? {
            log::debug!("store already initialized: bookmark '{BOOKMARK}' exists");
            return Ok(());
        }

        let working = self.jj.current_change()?;
        let root_id = self.jj.resolve_ref("root()")?;

        // Make the current tree addressable before we move away from it.
        if !working.is_empty {
            self.jj
                .describe("@", "wong: snapshot working copy before store init")?;
        }
        // An empty, undescribed working change is abandoned once the
        // working copy moves, so the merge in the final step targets its
        // parents rather than the change itself. A described change
        // survives the move even when empty and is merged back in.
        let merge_parents: Vec<String> =
            if working.is_empty && working.description.trim().is_empty() {
                working.parents.clone()
            } else {
                vec![working.id.clone()]
            };

        // The side-channel is a child of the repository root: by
        // construction its tree can only ever contain what we put there.
        self.jj
            .new_with_parents(&["root()"], Some(SIDE_CHANNEL_DESCRIPTION))?;

        self.write_store_file(CONFIG_FILE, &serde_json::to_vec_pretty(&StoreConfig::default())?)?;
        self.write_store_file(
            METADATA_FILE,
            &serde_json::to_vec_pretty(&StoreMetadata::new())?,
        )?;

        // Re-describe to snapshot the new files into the change.
        self.jj.describe("@", SIDE_CHANNEL_DESCRIPTION)?;
        self.jj.create_branch(BOOKMARK)?;
        self.jj
            .set_config(IMMUTABLE_ALIAS_KEY, &format!("\"{BOOKMARK}\""))?;

        // Leave the user on a fresh working change that can see `.wong/`.
        // When the only lineage to merge is the repository root (a brand
        // new repository), the side-channel becomes the sole parent;
        // anything else merges back in.
        let fresh_repo = merge_parents.len() == 1 && merge_parents[0] == root_id;
        if fresh_repo {
            self.jj.new_with_parents(&[BOOKMARK], None)?;
        } else {
            let mut parents: Vec<&str> = merge_parents.iter().map(String::as_str).collect();
            parents.push(BOOKMARK);
            self.jj.new_with_parents(&parents, None)?;
        }

        log::debug!("store initialized: bookmark '{BOOKMARK}' created");
        Ok(())
    }

    fn write_store_file(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let dir = self.root.join(WONG_DIR);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(name), bytes)?;
        Ok(())
    }

    // ====== Reads (pinned to the side-channel) ======

    /// Contents of an issue record as of the last sync.
    pub fn read_issue(&self, id: &str) -> Result<Vec<u8>> {
        validate_issue_id(id)?;
        self.jj.get_file_version(&issue_rel_path(id), BOOKMARK)
    }

    /// Ids of every issue in the side-channel.
    pub fn list_issue_ids(&self) -> Result<Vec<String>> {
        let prefix = Path::new(WONG_DIR).join(ISSUES_DIR);
        let files = self.jj.list_files_at(BOOKMARK, &prefix)?;
        Ok(files
            .iter()
            .filter_map(|path| {
                Path::new(path)
                    .file_name()?
                    .to_str()?
                    .strip_suffix(".json")
                    .map(str::to_string)
            })
            .collect())
    }

    /// The store configuration as of the last sync.
    pub fn read_config(&self) -> Result<StoreConfig> {
        let rel = Path::new(WONG_DIR).join(CONFIG_FILE);
        let bytes = self.jj.get_file_version(&rel, BOOKMARK)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// The working copy's configuration, falling back to defaults. Used by
    /// sync so a mode change takes effect on the sync that records it.
    fn local_config(&self) -> StoreConfig {
        let path = self.root.join(WONG_DIR).join(CONFIG_FILE);
        std::fs::read(&path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }

    // ====== Writes (working copy + dirty map; durable on sync) ======

    /// Write an issue record. Takes effect in the side-channel on the next
    /// [`Store::sync`].
    pub fn write_issue(&self, id: &str, bytes: &[u8]) -> Result<()> {
        validate_issue_id(id)?;
        let rel = issue_rel_path(id);
        let abs = self.root.join(&rel);

        // Hold the dirty lock across the disk write so writes from this
        // instance are totally ordered.
        let mut dirty = self.dirty.lock().expect("dirty map lock poisoned");
        if let Some(parent) = abs.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&abs, bytes)?;
        dirty.insert(rel, bytes.to_vec());
        Ok(())
    }

    /// Remove an issue record. Takes effect in the side-channel on the
    /// next [`Store::sync`]. Removing an absent record is not an error.
    pub fn delete_issue(&self, id: &str) -> Result<()> {
        validate_issue_id(id)?;
        let rel = issue_rel_path(id);

        let mut dirty = self.dirty.lock().expect("dirty map lock poisoned");
        dirty.remove(&rel);
        match std::fs::remove_file(self.root.join(&rel)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of writes awaiting sync.
    pub fn pending_writes(&self) -> usize {
        self.dirty.lock().expect("dirty map lock poisoned").len()
    }

    fn restore_dirty(&self) {
        restore_dirty_files(&self.root, &self.dirty);
    }

    // ====== Sync ======

    /// Atomically fold the working copy's `.wong/` contents into the
    /// side-channel, re-pointing the bookmark, under the cross-workspace
    /// file lock.
    ///
    /// Sync is the only operation that takes the lock; side-channel updates
    /// across workspaces therefore form a linear history, and a sync
    /// observes any update that completed before it acquired the lock (the
    /// post-acquire stale refresh pulls it in).
    pub fn sync(&self) -> Result<()> {
        self.cancel.check()?;

        // Best effort: a stale working copy is repaired, a fresh one is
        // left alone.
        if let Err(e) = self.jj.update_stale_workspace("default") {
            log::debug!("pre-lock update-stale: {e}");
        }
        self.restore_dirty();

        let lock_path = self.jj.get_common_dir()?.join(SYNC_LOCK_FILE);
        let _lock = SyncLock::acquire(&lock_path, &self.cancel)?;

        // The previous lock holder may have advanced the side-channel,
        // making us stale again; repeat the refresh inside the lock.
        if let Err(e) = self.jj.update_stale_workspace("default") {
            log::debug!("post-lock update-stale: {e}");
        }
        self.restore_dirty();

        let result = match self.local_config().history_mode {
            HistoryMode::Squash => self.squash_into_side_channel(),
            HistoryMode::Chain => self.chain_onto_side_channel(),
        };

        match result {
            Ok(()) => {}
            Err(Error::CommandFailed { ref stderr, .. }) if reports_nothing_changed(stderr) => {
                log::debug!("sync: nothing to squash");
            }
            Err(e) => return Err(e),
        }

        self.dirty.lock().expect("dirty map lock poisoned").clear();
        Ok(())
    }

    fn squash_into_side_channel(&self) -> Result<()> {
        // -u keeps the side-channel's own description instead of folding
        // the working change's message in.
        self.jj.run_with_override(&[
            "squash", "--from", "@", "--into", BOOKMARK, "-u", WONG_DIR,
        ])?;
        Ok(())
    }

    /// Chain mode: park a fresh child on the side-channel head, squash the
    /// working `.wong/` tree into it, and advance the bookmark.
    fn chain_onto_side_channel(&self) -> Result<()> {
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let message = format!("wong: sync {stamp}");

        self.jj
            .run_with_override(&["new", BOOKMARK, "--no-edit", "-m", &message])?;
        let revset = format!("children({BOOKMARK}) & description(\"{message}\")");
        let new_id = self.jj.resolve_ref(&revset)?;

        self.jj.run_with_override(&[
            "squash", "--from", "@", "--into", &new_id, "-u", WONG_DIR,
        ])?;
        self.jj.run_with_override(&[
            "bookmark",
            "set",
            BOOKMARK,
            "-r",
            &new_id,
            "--allow-backwards",
        ])?;
        Ok(())
    }

    // ====== Remote sync ======

    /// Sync, then push the side-channel bookmark. Success when no remote
    /// is configured. A first-ever push (no remote bookmark to track)
    /// retries with the allow-new path.
    pub fn push(&self) -> Result<()> {
        self.sync()?;

        let Some(remote) = self.jj.get_remote()? else {
            log::debug!("push skipped: no remote configured");
            return Ok(());
        };

        match self.jj.push(&remote, BOOKMARK) {
            Ok(()) => Ok(()),
            Err(Error::CommandFailed { ref stderr, .. }) if needs_bookmark_tracking(stderr) => {
                if self.jj.track_branch(BOOKMARK, &remote).is_ok() {
                    self.jj.push(&remote, BOOKMARK)
                } else {
                    self.jj.push_with_upstream(&remote, BOOKMARK)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch the side-channel bookmark from the remote. With
    /// `ensure_merge_parent`, also guarantee the working change has the
    /// side-channel among its parents so `.wong/` stays visible.
    pub fn pull(&self, ensure_merge_parent: bool) -> Result<()> {
        let Some(remote) = self.jj.get_remote()? else {
            log::debug!("pull skipped: no remote configured");
            return Ok(());
        };

        self.jj.fetch(&remote, BOOKMARK)?;
        if ensure_merge_parent {
            self.ensure_merge_parent()?;
        }
        Ok(())
    }

    /// Make the side-channel a parent of the working change if it is not
    /// already one: the new working change's parents are the existing
    /// parents plus the side-channel.
    pub fn ensure_merge_parent(&self) -> Result<()> {
        let side = self.jj.resolve_ref(BOOKMARK)?;
        let working = self.jj.current_change()?;
        if working.parents.contains(&side) {
            return Ok(());
        }

        let mut parents: Vec<&str> = working.parents.iter().map(String::as_str).collect();
        parents.push(BOOKMARK);
        self.jj.new_with_parents(&parents, None)?;
        Ok(())
    }
}

/// Re-materialize dirty entries onto disk. They are the authoritative copy
/// of unsynced writes; failures are logged, not fatal, because the next
/// sync retries.
fn restore_dirty_files(root: &Path, dirty: &DirtyMap) {
    let map = dirty.lock().expect("dirty map lock poisoned");
    for (rel, bytes) in map.iter() {
        let abs = root.join(rel);
        if let Some(parent) = abs.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::warn!("dirty restore: mkdir {}: {e}", parent.display());
                continue;
            }
        }
        if let Err(e) = std::fs::write(&abs, bytes) {
            log::warn!("dirty restore: write {}: {e}", abs.display());
        }
    }
}

/// Whether a failed push means the remote bookmark is not tracked yet.
fn needs_bookmark_tracking(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("non-tracking") || lower.contains("untracked") || lower.contains("--allow-new")
}
