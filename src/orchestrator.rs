//! Workspace orchestrator: isolated per-subtask working copies.
//!
//! Each subtask gets its own jj workspace next to the repository
//! (`{base}/wong-subtask-{id}/`). Subtasks execute concurrently (the
//! backend guarantees per-workspace file isolation) and on completion
//! their change is squashed back into the parent change they branched
//! from. A squash that conflicts hands the default workspace to the
//! [conflict engine](crate::conflict); what it cannot auto-resolve leaves
//! the subtask `conflicted` with its workspace preserved on disk and a
//! tracking issue persisted to the store.
//!
//! Completion is serialized by an internal mutex: concurrent subtask
//! *execution* is safe, concurrent *completion* would race on the default
//! workspace, so it is not allowed to.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::conflict;
use crate::error::{Error, Result};
use crate::store::{Store, WONG_DIR};
use crate::vcs::Vcs;
use crate::vcs::jj::JjBackend;

/// Lifecycle state of a subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Conflicted,
}

/// One orchestrated unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub description: String,
    pub workspace_name: String,
    pub workspace_path: PathBuf,
    /// Change in the default workspace this subtask branched from.
    pub parent_change_id: String,
    /// Head of work in the subtask workspace.
    pub current_change_id: String,
    pub state: SubtaskState,
    pub created_at: String,
    pub updated_at: String,
    pub error: Option<String>,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn hex_suffix() -> String {
    format!("{:06x}", rand::random::<u32>() & 0x00ff_ffff)
}

/// `{prefix}-{6 hex}`; the prefix defaults to `task`.
pub fn generate_task_id(prefix: &str) -> String {
    let prefix = if prefix.is_empty() { "task" } else { prefix };
    format!("{prefix}-{}", hex_suffix())
}

/// `{prefix}-{first 8 chars of change_id, lowercased}`.
pub fn generate_task_id_from_change_id(prefix: &str, change_id: &str) -> String {
    let prefix = if prefix.is_empty() { "task" } else { prefix };
    let short: String = change_id.chars().take(8).collect();
    format!("{prefix}-{}", short.to_lowercase())
}

/// `{parent}-{6 hex}`, or `subtask-{6 hex}` without a parent.
pub fn generate_subtask_id(parent: Option<&str>) -> String {
    match parent {
        Some(parent) if !parent.is_empty() => format!("{parent}-{}", hex_suffix()),
        _ => format!("subtask-{}", hex_suffix()),
    }
}

/// Split a task id into `(all-but-last, last, is_subtask)`.
///
/// `is_subtask` is true iff the id has at least three `-`-separated
/// segments (a subtask id is a parent task id plus a suffix).
pub fn parse_task_id(id: &str) -> (String, String, bool) {
    let segments: Vec<&str> = id.split('-').collect();
    if segments.len() < 2 {
        return (id.to_string(), String::new(), false);
    }
    let last = (*segments.last().expect("nonempty split")).to_string();
    let head = segments[..segments.len() - 1].join("-");
    (head, last, segments.len() >= 3)
}

/// Orchestrates subtask workspaces over one repository's default workspace.
pub struct Orchestrator {
    store: Arc<Store>,
    jj: Arc<JjBackend>,
    root: PathBuf,
    subtasks: Mutex<HashMap<String, Subtask>>,
    /// Serializes `complete_subtask`/`fail_subtask`/`resolve_conflict`;
    /// they all mutate the default workspace.
    completion: Mutex<()>,
}

impl Orchestrator {
    pub fn new(store: Arc<Store>) -> Self {
        let jj = store.jj().clone();
        let root = store.root().to_path_buf();
        Self {
            store,
            jj,
            root,
            subtasks: Mutex::new(HashMap::new()),
            completion: Mutex::new(()),
        }
    }

    /// Directory subtask workspaces are created under: the repository
    /// root's parent, falling back to the root itself at the filesystem
    /// top.
    fn workspace_base(&self) -> PathBuf {
        self.root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone())
    }

    /// Create a subtask workspace branched from the default workspace's
    /// current change. The subtask starts `pending`.
    pub fn create_subtask(&self, id: &str, description: &str) -> Result<Subtask> {
        let current = self.jj.current_change()?;
        let workspace_name = format!("subtask-{id}");
        let base = self.workspace_base();
        let workspace_path = base.join(format!("wong-subtask-{id}"));

        // The backend creates the leaf directory itself.
        std::fs::create_dir_all(&base)?;
        self.jj.create_workspace(&workspace_name, &workspace_path)?;

        let stamp = now();
        let subtask = Subtask {
            id: id.to_string(),
            description: description.to_string(),
            workspace_name,
            workspace_path,
            parent_change_id: current.id.clone(),
            current_change_id: current.id,
            state: SubtaskState::Pending,
            created_at: stamp.clone(),
            updated_at: stamp,
            error: None,
        };

        self.persist(&subtask);
        self.subtasks
            .lock()
            .expect("subtask map lock poisoned")
            .insert(id.to_string(), subtask.clone());
        Ok(subtask)
    }

    /// Mark a subtask as dispatched.
    pub fn mark_running(&self, id: &str) -> Result<()> {
        self.update(id, |sub| {
            sub.state = SubtaskState::Running;
        })
    }

    /// Squash a finished subtask's change back into its parent and clean
    /// up its workspace.
    ///
    /// On a conflicting squash the conflict engine runs; if it resolves
    /// everything the subtask still completes, otherwise it ends
    /// `conflicted` (workspace preserved, tracking issue written) and a
    /// typed [`Error::SubtaskConflict`] is returned.
    pub fn complete_subtask(&self, id: &str) -> Result<()> {
        let _serial = self.completion.lock().expect("completion lock poisoned");

        let subtask = self.get_subtask(id)?;
        let workspace = JjBackend::open(&subtask.workspace_path)?;
        let head = workspace.current_change()?;
        self.update(id, |sub| {
            sub.current_change_id = head.id.clone();
        })?;

        // The parent may be pinned by the immutable side-channel alias.
        let squash_result = self.jj.run_with_override(&[
            "squash",
            "--from",
            &head.id,
            "--into",
            &subtask.parent_change_id,
            "-u",
        ]);

        // The snapshot backend records conflicts in the change rather than
        // failing the squash, so check the default workspace either way.
        let conflicted = self.jj.has_merge_conflicts().unwrap_or(false);

        if conflicted {
            return self.handle_conflicted_completion(&subtask);
        }

        match squash_result {
            Ok(_) => {
                self.update(id, |sub| {
                    sub.state = SubtaskState::Completed;
                    sub.error = None;
                })?;
                self.cleanup_workspace(&subtask);
                Ok(())
            }
            Err(e) => {
                self.update(id, |sub| {
                    sub.state = SubtaskState::Failed;
                    sub.error = Some(e.to_string());
                })?;
                Err(e)
            }
        }
    }

    fn handle_conflicted_completion(&self, subtask: &Subtask) -> Result<()> {
        let conflicts = self.jj.get_conflicts()?;
        let (_infos, outcome) = conflict::auto_resolve(&self.jj, &conflicts, &subtask.id)?;

        let still_conflicted = self.jj.has_merge_conflicts().unwrap_or(true);
        if outcome.fully_resolved() && !still_conflicted {
            log::debug!(
                "subtask '{}': {} conflict(s) auto-resolved",
                subtask.id,
                outcome.auto_resolved.len()
            );
            self.update(&subtask.id, |sub| {
                sub.state = SubtaskState::Completed;
                sub.error = None;
            })?;
            self.cleanup_workspace(subtask);
            return Ok(());
        }

        // Preserve the workspace for manual resolution and leave a trail
        // in the store.
        let (issue_id, record) =
            conflict::tracking_record(&subtask.id, &subtask.description, &outcome);
        if let Err(e) = self
            .store
            .write_issue(&issue_id, &serde_json::to_vec_pretty(&record)?)
        {
            log::warn!("failed to persist conflict tracking issue: {e}");
        }

        let message = format!(
            "{} path(s) need manual resolution (tracking issue {issue_id})",
            outcome.manual.len()
        );
        self.update(&subtask.id, |sub| {
            sub.state = SubtaskState::Conflicted;
            sub.error = Some(message.clone());
        })?;

        Err(Error::SubtaskConflict {
            subtask_id: subtask.id.clone(),
            description: subtask.description.clone(),
            message,
        })
    }

    /// Abandon a subtask: its change is abandoned (best effort) and its
    /// workspace removed.
    pub fn fail_subtask(&self, id: &str, reason: &str) -> Result<()> {
        let _serial = self.completion.lock().expect("completion lock poisoned");

        let subtask = self.get_subtask(id)?;
        self.update(id, |sub| {
            sub.state = SubtaskState::Failed;
            sub.error = Some(reason.to_string());
        })?;

        // Abandon the workspace's change so no orphaned head lingers.
        if let Ok(workspace) = JjBackend::open(&subtask.workspace_path)
            && let Ok(head) = workspace.current_change()
            && let Err(e) = self.jj.run(&["abandon", &head.id])
        {
            log::warn!("failed to abandon change of subtask '{id}': {e}");
        }

        self.cleanup_workspace(&subtask);
        Ok(())
    }

    /// Finish a `conflicted` subtask after its conflicts were resolved by
    /// hand in the default workspace.
    pub fn resolve_conflict(&self, id: &str) -> Result<()> {
        let _serial = self.completion.lock().expect("completion lock poisoned");

        let subtask = self.get_subtask(id)?;
        if subtask.state != SubtaskState::Conflicted {
            return Err(Error::SubtaskNotConflicted {
                id: id.to_string(),
                state: format!("{:?}", subtask.state).to_lowercase(),
            });
        }
        if self.jj.has_merge_conflicts()? {
            let paths = self
                .jj
                .get_conflicts()?
                .into_iter()
                .map(|c| c.path)
                .collect();
            return Err(Error::MergeConflict { paths });
        }

        self.update(id, |sub| {
            sub.state = SubtaskState::Completed;
            sub.error = None;
        })?;
        self.cleanup_workspace(&subtask);
        Ok(())
    }

    pub fn get_subtask(&self, id: &str) -> Result<Subtask> {
        self.subtasks
            .lock()
            .expect("subtask map lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| Error::SubtaskNotFound { id: id.to_string() })
    }

    pub fn list_subtasks(&self) -> Vec<Subtask> {
        let mut subtasks: Vec<Subtask> = self
            .subtasks
            .lock()
            .expect("subtask map lock poisoned")
            .values()
            .cloned()
            .collect();
        subtasks.sort_by(|a, b| a.id.cmp(&b.id));
        subtasks
    }

    fn update(&self, id: &str, mutate: impl FnOnce(&mut Subtask)) -> Result<()> {
        let mut map = self.subtasks.lock().expect("subtask map lock poisoned");
        let Some(subtask) = map.get_mut(id) else {
            return Err(Error::SubtaskNotFound { id: id.to_string() });
        };
        mutate(subtask);
        subtask.updated_at = now();
        let snapshot = subtask.clone();
        drop(map);
        self.persist(&snapshot);
        Ok(())
    }

    /// Write the subtask record under `.wong/subtasks/` so other processes
    /// can observe orchestrator state. Best effort.
    fn persist(&self, subtask: &Subtask) {
        let dir = self.root.join(WONG_DIR).join("subtasks");
        let write = || -> Result<()> {
            std::fs::create_dir_all(&dir)?;
            let bytes = serde_json::to_vec_pretty(subtask)?;
            std::fs::write(dir.join(format!("{}.json", subtask.id)), bytes)?;
            Ok(())
        };
        if let Err(e) = write() {
            log::warn!("failed to persist subtask '{}': {e}", subtask.id);
        }
    }

    /// Remove the subtask's workspace registration and directory,
    /// logging failures rather than masking the completion result.
    fn cleanup_workspace(&self, subtask: &Subtask) {
        if let Err(e) = self.jj.remove_workspace(&subtask.workspace_name) {
            log::warn!(
                "failed to forget workspace '{}': {e}",
                subtask.workspace_name
            );
        }
        if let Err(e) = std::fs::remove_dir_all(&subtask.workspace_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!(
                    "failed to remove {}: {e}",
                    subtask.workspace_path.display()
                );
            }
        }
    }
}
