//! Store integration tests against a real `jj` binary.
//!
//! Each test builds a throwaway repository under a tempdir and drives the
//! store end to end: init, writes, sync, deletes, concurrent sync from a
//! second workspace.

mod common;

use std::path::Path;

use wong::store::{BOOKMARK, Store, WONG_DIR};
use wong::vcs::Vcs;
use wong::{Context, Error};

#[test]
fn init_into_empty_repo() {
    require_jj!();
    let td = tempfile::tempdir().unwrap();
    common::init_jj_repo(td.path());

    let ctx = Context::discover(td.path()).unwrap();
    let store = Store::open(&ctx).unwrap();
    store.init().unwrap();

    let backend = ctx.backend();
    assert!(backend.branch_exists(BOOKMARK).unwrap());

    // The working change is a fresh child of the side-channel.
    let side = backend.resolve_ref(BOOKMARK).unwrap();
    let working = backend.current_change().unwrap();
    assert_eq!(working.parents, vec![side]);

    // The side-channel tree holds the store files and nothing else.
    let files = backend.list_files_at(BOOKMARK, Path::new(".")).unwrap();
    assert!(files.iter().any(|f| f == ".wong/config.json"), "{files:?}");
    assert!(files.iter().any(|f| f == ".wong/metadata.json"), "{files:?}");
    assert!(files.iter().all(|f| f.starts_with(".wong/")), "{files:?}");
}

#[test]
fn init_is_idempotent() {
    require_jj!();
    let td = tempfile::tempdir().unwrap();
    common::init_jj_repo(td.path());

    let ctx = Context::discover(td.path()).unwrap();
    let store = Store::open(&ctx).unwrap();
    store.init().unwrap();

    let side_before = ctx.backend().resolve_ref(BOOKMARK).unwrap();
    store.init().unwrap();
    let side_after = ctx.backend().resolve_ref(BOOKMARK).unwrap();
    assert_eq!(side_before, side_after);
}

#[test]
fn init_preserves_described_empty_working_change() {
    require_jj!();
    let td = tempfile::tempdir().unwrap();
    common::init_jj_repo(td.path());
    // A description pins the otherwise-ephemeral change: it must survive
    // init and end up merged into the new working change's lineage.
    common::run(td.path(), "jj", &["describe", "-m", "notes before init"]);

    let ctx = Context::discover(td.path()).unwrap();
    let store = Store::open(&ctx).unwrap();
    store.init().unwrap();

    let backend = ctx.backend();
    let side = backend.resolve_ref(BOOKMARK).unwrap();
    let working = backend.current_change().unwrap();
    assert_eq!(
        working.parents.len(),
        2,
        "described pre-init change must be merged in: {:?}",
        working.parents
    );
    assert!(working.parents.contains(&side));

    let described = backend
        .resolve_ref(r#"description("notes before init")"#)
        .unwrap();
    assert!(working.parents.contains(&described));
}

#[test]
fn init_into_repo_with_content() {
    require_jj!();
    let td = tempfile::tempdir().unwrap();
    common::init_jj_repo(td.path());
    std::fs::write(td.path().join("main.go"), "package main\n").unwrap();
    std::fs::write(td.path().join("README.md"), "# demo\n").unwrap();
    common::run(td.path(), "jj", &["commit", "-m", "initial sources"]);

    let ctx = Context::discover(td.path()).unwrap();
    let store = Store::open(&ctx).unwrap();
    store.init().unwrap();

    let backend = ctx.backend();
    let working = backend.current_change().unwrap();
    assert_eq!(working.parents.len(), 2, "expected merge of prior change and side-channel");
    let side = backend.resolve_ref(BOOKMARK).unwrap();
    assert!(working.parents.contains(&side));

    // No source files leak into the side-channel.
    let files = backend.list_files_at(BOOKMARK, Path::new(".")).unwrap();
    assert!(files.iter().all(|f| f.starts_with(".wong/")), "{files:?}");

    // The working copy still sees both worlds.
    assert!(td.path().join("main.go").exists());
    assert!(td.path().join(WONG_DIR).join("config.json").exists());
}

#[test]
fn write_sync_list_delete_roundtrip() {
    require_jj!();
    let td = tempfile::tempdir().unwrap();
    common::init_jj_repo(td.path());

    let ctx = Context::discover(td.path()).unwrap();
    let store = Store::open(&ctx).unwrap();
    store.init().unwrap();

    for n in 1..=3 {
        let id = format!("e2e-00{n}");
        let payload = serde_json::json!({ "id": id, "title": n.to_string() });
        store
            .write_issue(&id, &serde_json::to_vec(&payload).unwrap())
            .unwrap();
    }
    assert_eq!(store.pending_writes(), 3);
    store.sync().unwrap();
    assert_eq!(store.pending_writes(), 0);

    let mut ids = store.list_issue_ids().unwrap();
    ids.sort();
    assert_eq!(ids, ["e2e-001", "e2e-002", "e2e-003"]);

    // Reads come back bytes-for-meaning identical.
    let bytes = store.read_issue("e2e-002").unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["title"], "2");

    store.delete_issue("e2e-002").unwrap();
    store.sync().unwrap();
    let mut ids = store.list_issue_ids().unwrap();
    ids.sort();
    assert_eq!(ids, ["e2e-001", "e2e-003"]);
}

#[test]
fn idempotent_sync_leaves_bookmark_alone() {
    require_jj!();
    let td = tempfile::tempdir().unwrap();
    common::init_jj_repo(td.path());

    let ctx = Context::discover(td.path()).unwrap();
    let store = Store::open(&ctx).unwrap();
    store.init().unwrap();
    store.write_issue("stable", br#"{"id":"stable"}"#).unwrap();
    store.sync().unwrap();

    let before = ctx.backend().resolve_ref(BOOKMARK).unwrap();
    store.sync().unwrap();
    let after = ctx.backend().resolve_ref(BOOKMARK).unwrap();
    assert_eq!(before, after);
}

#[test]
fn path_traversal_ids_rejected() {
    require_jj!();
    let td = tempfile::tempdir().unwrap();
    common::init_jj_repo(td.path());

    let ctx = Context::discover(td.path()).unwrap();
    let store = Store::open(&ctx).unwrap();
    store.init().unwrap();

    let err = store.write_issue("../../../etc/passwd", b"x").unwrap_err();
    assert!(matches!(err, Error::InvalidIssueId { .. }));
    let err = store.read_issue("..").unwrap_err();
    assert!(matches!(err, Error::InvalidIssueId { .. }));
    let err = store.delete_issue("a/b").unwrap_err();
    assert!(matches!(err, Error::InvalidIssueId { .. }));

    // Nothing escaped the issues directory.
    assert!(store.pending_writes() == 0);
    let issues_dir = td.path().join(WONG_DIR).join("issues");
    if issues_dir.exists() {
        assert_eq!(std::fs::read_dir(&issues_dir).unwrap().count(), 0);
    }
}

#[test]
fn concurrent_sync_from_two_workspaces() {
    require_jj!();
    let base = tempfile::tempdir().unwrap();
    let repo = base.path().join("repo");
    std::fs::create_dir(&repo).unwrap();
    common::init_jj_repo(&repo);

    let ctx = Context::discover(&repo).unwrap();
    let store = Store::open(&ctx).unwrap();
    store.init().unwrap();

    let second = base.path().join("second");
    ctx.backend().create_workspace("second", &second).unwrap();

    let ctx2 = Context::discover(&second).unwrap();
    let store2 = Store::open(&ctx2).unwrap();

    store.write_issue("a", br#"{"id":"a"}"#).unwrap();
    store2.write_issue("b", br#"{"id":"b"}"#).unwrap();

    std::thread::scope(|scope| {
        let first = scope.spawn(|| store.sync());
        let second = scope.spawn(|| store2.sync());
        first.join().unwrap().unwrap();
        second.join().unwrap().unwrap();
    });

    // The lock serialized the squashes; both writes survived.
    let mut ids = store.list_issue_ids().unwrap();
    ids.sort();
    assert_eq!(ids, ["a", "b"]);
}

#[test]
fn push_without_remote_succeeds() {
    require_jj!();
    let td = tempfile::tempdir().unwrap();
    common::init_jj_repo(td.path());

    let ctx = Context::discover(td.path()).unwrap();
    let store = Store::open(&ctx).unwrap();
    store.init().unwrap();
    store.write_issue("local-only", br#"{"id":"local-only"}"#).unwrap();

    // No remote configured: sync happens, push is a no-op success.
    store.push().unwrap();
    assert!(store.list_issue_ids().unwrap().contains(&"local-only".to_string()));
}

#[test]
fn ensure_merge_parent_reattaches_side_channel() {
    require_jj!();
    let td = tempfile::tempdir().unwrap();
    common::init_jj_repo(td.path());

    let ctx = Context::discover(td.path()).unwrap();
    let store = Store::open(&ctx).unwrap();
    store.init().unwrap();

    // Detach the working change from the side-channel.
    common::run(td.path(), "jj", &["new", "root()"]);
    let side = ctx.backend().resolve_ref(BOOKMARK).unwrap();
    let detached = ctx.backend().current_change().unwrap();
    assert!(!detached.parents.contains(&side));

    store.ensure_merge_parent().unwrap();
    let working = ctx.backend().current_change().unwrap();
    assert!(working.parents.contains(&side));
}

#[test]
fn chain_mode_advances_the_bookmark() {
    require_jj!();
    let td = tempfile::tempdir().unwrap();
    common::init_jj_repo(td.path());

    let ctx = Context::discover(td.path()).unwrap();
    let store = Store::open(&ctx).unwrap();
    store.init().unwrap();

    let side0 = ctx.backend().resolve_ref(BOOKMARK).unwrap();
    std::fs::write(
        td.path().join(WONG_DIR).join("config.json"),
        br#"{"prefix":"wong","history_mode":"chain"}"#,
    )
    .unwrap();

    store.write_issue("chained", br#"{"id":"chained"}"#).unwrap();
    store.sync().unwrap();

    let side1 = ctx.backend().resolve_ref(BOOKMARK).unwrap();
    assert_ne!(side0, side1, "chain mode must append a new change");
    assert!(ctx.backend().is_ancestor(&side0, &side1).unwrap());
    assert!(store.list_issue_ids().unwrap().contains(&"chained".to_string()));
}

#[test]
fn store_requires_the_jj_backend() {
    require_git!();
    let td = tempfile::tempdir().unwrap();
    common::init_git_repo(td.path());

    let ctx = Context::discover(td.path()).unwrap();
    let err = Store::open(&ctx).unwrap_err();
    assert!(matches!(err, Error::NotSupported { .. }));
}
