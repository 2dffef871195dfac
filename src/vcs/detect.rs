//! VCS detection and the per-process repository context.
//!
//! [`detect`] walks ancestor directories looking for `.jj/` or `.git/`
//! markers. Co-located repositories (both markers in the same directory)
//! choose jj: the snapshot model is the primary VCS there and the git side
//! is an export target.
//!
//! [`Context::discover`] wraps detection in a process-wide cache keyed by
//! repository root, so concurrent callers share one backend handle per
//! repository. [`reset_cache`] exists for test isolation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::error::{Error, Result};

use super::git::GitBackend;
use super::jj::JjBackend;
use super::{Vcs, VcsKind};

/// Cache of discovered contexts, keyed by repository root. The dashmap
/// entry API gives one-shot initialization per key: concurrent callers for
/// the same root block on the shard and then share the instance.
static CONTEXTS: Lazy<DashMap<PathBuf, Arc<Context>>> = Lazy::new(DashMap::new);

/// Detect which VCS manages the repository containing `path`.
///
/// Walks ancestors from `path`. At each level:
/// - `.jj/` present → jj, even when `.git/` also exists (co-located repos
///   carry both and jj owns the history)
/// - `.git/` present (directory, or file for linked worktrees) → git
///
/// Returns the kind and the directory the marker was found in.
pub fn detect(start: &Path) -> Result<(VcsKind, PathBuf)> {
    let start_abs = if start.is_absolute() {
        start.to_path_buf()
    } else {
        std::env::current_dir()?.join(start)
    };

    let mut current = Some(start_abs.as_path());
    while let Some(dir) = current {
        if dir.join(".jj").is_dir() {
            return Ok((VcsKind::Jj, dir.to_path_buf()));
        }
        if dir.join(".git").exists() {
            return Ok((VcsKind::Git, dir.to_path_buf()));
        }
        current = dir.parent();
    }

    Err(Error::NoVcsFound { start: start_abs })
}

/// True only when both metadata directories sit in the same directory.
pub fn is_colocated(path: &Path) -> bool {
    path.join(".jj").is_dir() && path.join(".git").exists()
}

/// A discovered repository: its root, kind, and one shared backend handle.
pub struct Context {
    root: PathBuf,
    kind: VcsKind,
    backend: Arc<dyn Vcs>,
    /// Concrete jj handle when the backend is jj; the store and
    /// orchestrator need jj-specific operations (describe, overrides).
    jj: Option<Arc<JjBackend>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("root", &self.root)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Discover the repository containing `start`, sharing a cached
    /// instance when one exists for the same root.
    pub fn discover(start: &Path) -> Result<Arc<Self>> {
        let (kind, root) = detect(start)?;
        let root = dunce::canonicalize(&root).unwrap_or(root);

        if let Some(ctx) = CONTEXTS.get(&root) {
            return Ok(ctx.value().clone());
        }

        // entry() holds the shard lock while initializing, so a concurrent
        // discover for the same root waits and then shares this instance.
        let entry = CONTEXTS
            .entry(root.clone())
            .or_try_insert_with(|| -> Result<Arc<Context>> {
                Ok(Arc::new(Self::open(kind, root.clone())?))
            })?;
        Ok(entry.value().clone())
    }

    /// Open a context without consulting or populating the cache.
    pub fn open(kind: VcsKind, root: PathBuf) -> Result<Self> {
        let (backend, jj): (Arc<dyn Vcs>, Option<Arc<JjBackend>>) = match kind {
            VcsKind::Jj => {
                let backend = Arc::new(JjBackend::open(&root)?);
                (backend.clone() as Arc<dyn Vcs>, Some(backend))
            }
            VcsKind::Git => (Arc::new(GitBackend::open(&root)?) as Arc<dyn Vcs>, None),
        };
        Ok(Self {
            root,
            kind,
            backend,
            jj,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn kind(&self) -> VcsKind {
        self.kind
    }

    pub fn backend(&self) -> &Arc<dyn Vcs> {
        &self.backend
    }

    /// The concrete jj handle, when this repository uses the jj backend.
    pub fn jj(&self) -> Option<&Arc<JjBackend>> {
        self.jj.as_ref()
    }
}

/// Drop every cached context. Tests use this to isolate repositories
/// created and deleted within one process.
pub fn reset_cache() {
    CONTEXTS.clear();
}
