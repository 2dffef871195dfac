//! Orchestrator integration tests against a real `jj` binary.
//!
//! Subtask workspaces live next to the repository under the same tempdir,
//! so cleanup assertions can look at real paths.

mod common;

use std::sync::Arc;

use wong::orchestrator::{Orchestrator, SubtaskState};
use wong::store::{Store, WONG_DIR};
use wong::{Context, Error};

/// Repo at `{base}/repo` with an initialized store; workspaces land in
/// `{base}`.
fn setup(base: &std::path::Path) -> (Arc<Context>, Arc<Store>, Orchestrator) {
    let repo = base.join("repo");
    std::fs::create_dir(&repo).unwrap();
    common::init_jj_repo(&repo);

    let ctx = Context::discover(&repo).unwrap();
    let store = Arc::new(Store::open(&ctx).unwrap());
    store.init().unwrap();
    let orchestrator = Orchestrator::new(store.clone());
    (ctx, store, orchestrator)
}

#[test]
fn subtask_lifecycle_clean_completion() {
    require_jj!();
    let base = tempfile::tempdir().unwrap();
    let (_ctx, store, orchestrator) = setup(base.path());

    let subtask = orchestrator.create_subtask("task-1a2b3c", "add issue y").unwrap();
    assert_eq!(subtask.state, SubtaskState::Pending);
    assert!(subtask.workspace_path.exists());
    assert_eq!(subtask.workspace_name, "subtask-task-1a2b3c");

    orchestrator.mark_running("task-1a2b3c").unwrap();
    assert_eq!(
        orchestrator.get_subtask("task-1a2b3c").unwrap().state,
        SubtaskState::Running
    );

    // Work happens inside the isolated workspace.
    let issues = subtask.workspace_path.join(WONG_DIR).join("issues");
    std::fs::create_dir_all(&issues).unwrap();
    std::fs::write(issues.join("y.json"), br#"{"id":"y","title":"from subtask"}"#).unwrap();

    orchestrator.complete_subtask("task-1a2b3c").unwrap();
    let done = orchestrator.get_subtask("task-1a2b3c").unwrap();
    assert_eq!(done.state, SubtaskState::Completed);
    assert!(!done.workspace_path.exists(), "workspace should be cleaned up");

    // The squashed work is visible in the default workspace and syncs.
    store.sync().unwrap();
    assert!(store.list_issue_ids().unwrap().contains(&"y".to_string()));
}

#[test]
fn subtask_records_are_persisted() {
    require_jj!();
    let base = tempfile::tempdir().unwrap();
    let (_ctx, _store, orchestrator) = setup(base.path());

    orchestrator.create_subtask("task-9f8e7d", "persisted").unwrap();
    let record_path = base
        .path()
        .join("repo")
        .join(WONG_DIR)
        .join("subtasks")
        .join("task-9f8e7d.json");
    assert!(record_path.exists());

    let bytes = std::fs::read(&record_path).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["state"], "pending");
    assert_eq!(value["description"], "persisted");
}

#[test]
fn conflicting_source_edit_tracks_a_conflict() {
    require_jj!();
    let base = tempfile::tempdir().unwrap();
    let (ctx, _store, orchestrator) = setup(base.path());
    let repo = base.path().join("repo");

    // Shared file committed before the subtask branches off.
    std::fs::write(repo.join("notes.txt"), "base\n").unwrap();
    common::run(&repo, "jj", &["describe", "-m", "add notes"]);

    let subtask = orchestrator.create_subtask("task-c0ffee", "edit notes").unwrap();

    // Subtask and default workspace edit the same file differently.
    std::fs::write(subtask.workspace_path.join("notes.txt"), "subtask version\n").unwrap();
    std::fs::write(repo.join("notes.txt"), "default version\n").unwrap();

    let err = orchestrator.complete_subtask("task-c0ffee").unwrap_err();
    assert!(matches!(err, Error::SubtaskConflict { .. }), "{err:?}");

    let conflicted = orchestrator.get_subtask("task-c0ffee").unwrap();
    assert_eq!(conflicted.state, SubtaskState::Conflicted);
    assert!(
        conflicted.workspace_path.exists(),
        "conflicted workspace must be preserved"
    );

    // Exactly one tracking issue was written for the batch.
    let issues_dir = repo.join(WONG_DIR).join("issues");
    let tracking: Vec<_> = std::fs::read_dir(&issues_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("conflict-"))
        .collect();
    assert_eq!(tracking.len(), 1);

    let bytes = std::fs::read(tracking[0].path()).unwrap();
    let record: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(record["type"], "bug");
    assert_eq!(record["priority"], 0);
    assert!(
        record["title"]
            .as_str()
            .unwrap()
            .contains("task-c0ffee")
    );

    // Manual resolution in the default workspace unblocks the subtask.
    common::run(&repo, "jj", &["restore", "--from", "@-", "notes.txt"]);
    assert!(!ctx.backend().has_merge_conflicts().unwrap());
    orchestrator.resolve_conflict("task-c0ffee").unwrap();
    assert_eq!(
        orchestrator.get_subtask("task-c0ffee").unwrap().state,
        SubtaskState::Completed
    );
    assert!(!conflicted.workspace_path.exists());
}

#[test]
fn wong_file_conflict_auto_resolves() {
    require_jj!();
    let base = tempfile::tempdir().unwrap();
    let (_ctx, store, orchestrator) = setup(base.path());
    let repo = base.path().join("repo");

    // Issue "x" exists in the side-channel before anyone branches.
    store.write_issue("x", br#"{"id":"x","rev":1}"#).unwrap();
    store.sync().unwrap();

    let subtask = orchestrator.create_subtask("task-aaaaaa", "bump x").unwrap();

    // Both sides rewrite the same record.
    let sub_issue = subtask.workspace_path.join(WONG_DIR).join("issues").join("x.json");
    std::fs::create_dir_all(sub_issue.parent().unwrap()).unwrap();
    std::fs::write(&sub_issue, br#"{"id":"x","rev":2}"#).unwrap();
    std::fs::write(
        repo.join(WONG_DIR).join("issues").join("x.json"),
        br#"{"id":"x","rev":3}"#,
    )
    .unwrap();

    // The store-file conflict is auto-resolvable, so completion succeeds
    // and no tracking issue appears.
    orchestrator.complete_subtask("task-aaaaaa").unwrap();
    assert_eq!(
        orchestrator.get_subtask("task-aaaaaa").unwrap().state,
        SubtaskState::Completed
    );

    let issues_dir = repo.join(WONG_DIR).join("issues");
    let tracking = std::fs::read_dir(&issues_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("conflict-"))
        .count();
    assert_eq!(tracking, 0);

    // The surviving record is valid JSON, not conflict markers.
    let bytes = std::fs::read(issues_dir.join("x.json")).unwrap();
    assert!(serde_json::from_slice::<serde_json::Value>(&bytes).is_ok());
}

#[test]
fn fail_subtask_cleans_up() {
    require_jj!();
    let base = tempfile::tempdir().unwrap();
    let (_ctx, _store, orchestrator) = setup(base.path());

    let subtask = orchestrator.create_subtask("task-deadbe", "doomed").unwrap();
    std::fs::write(subtask.workspace_path.join("scratch.txt"), "wip\n").unwrap();

    orchestrator.fail_subtask("task-deadbe", "executor crashed").unwrap();
    let failed = orchestrator.get_subtask("task-deadbe").unwrap();
    assert_eq!(failed.state, SubtaskState::Failed);
    assert_eq!(failed.error.as_deref(), Some("executor crashed"));
    assert!(!failed.workspace_path.exists());
}

#[test]
fn parallel_subtask_execution_is_isolated() {
    require_jj!();
    let base = tempfile::tempdir().unwrap();
    let (_ctx, store, orchestrator) = setup(base.path());

    let first = orchestrator.create_subtask("task-111111", "one").unwrap();
    let second = orchestrator.create_subtask("task-222222", "two").unwrap();

    // Concurrent work in distinct workspaces, then sequential completion.
    std::thread::scope(|scope| {
        let a = scope.spawn(|| {
            let dir = first.workspace_path.join(WONG_DIR).join("issues");
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("one.json"), br#"{"id":"one"}"#).unwrap();
        });
        let b = scope.spawn(|| {
            let dir = second.workspace_path.join(WONG_DIR).join("issues");
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("two.json"), br#"{"id":"two"}"#).unwrap();
        });
        a.join().unwrap();
        b.join().unwrap();
    });

    orchestrator.complete_subtask("task-111111").unwrap();
    orchestrator.complete_subtask("task-222222").unwrap();

    store.sync().unwrap();
    let ids = store.list_issue_ids().unwrap();
    assert!(ids.contains(&"one".to_string()), "{ids:?}");
    assert!(ids.contains(&"two".to_string()), "{ids:?}");
}
