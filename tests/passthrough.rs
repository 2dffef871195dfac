//! Decorator integration tests: write commands trigger a store sync,
//! read commands do not, and exit codes pass through untouched.

mod common;

use wong::store::{Store, WONG_DIR};
use wong::{Context, passthrough};

fn write_external_issue(repo: &std::path::Path, id: &str) {
    let dir = repo.join(WONG_DIR).join("issues");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join(format!("{id}.json")),
        format!(r#"{{"id":"{id}","source":"external"}}"#),
    )
    .unwrap();
}

#[test]
fn write_command_syncs_external_edits() {
    require_jj!();
    let td = tempfile::tempdir().unwrap();
    common::init_jj_repo(td.path());

    let ctx = Context::discover(td.path()).unwrap();
    let store = Store::open(&ctx).unwrap();
    store.init().unwrap();

    // An external tool drops an issue file into the working copy, then
    // runs a write command through the shim.
    write_external_issue(td.path(), "ext-write");
    let code = passthrough::run(
        td.path(),
        &["describe".into(), "-m".into(), "external tick".into()],
    )
    .unwrap();
    assert_eq!(code, 0);

    assert!(
        store
            .list_issue_ids()
            .unwrap()
            .contains(&"ext-write".to_string()),
        "post-sync should have published the external edit"
    );
}

#[test]
fn read_command_does_not_sync() {
    require_jj!();
    let td = tempfile::tempdir().unwrap();
    common::init_jj_repo(td.path());

    let ctx = Context::discover(td.path()).unwrap();
    let store = Store::open(&ctx).unwrap();
    store.init().unwrap();

    write_external_issue(td.path(), "ext-read");
    let code = passthrough::run(td.path(), &["log".into(), "--no-graph".into()]).unwrap();
    assert_eq!(code, 0);

    assert!(
        !store
            .list_issue_ids()
            .unwrap()
            .contains(&"ext-read".to_string()),
        "read commands must not publish working-copy edits"
    );
}

#[test]
fn failing_command_propagates_exit_code_without_sync() {
    require_jj!();
    let td = tempfile::tempdir().unwrap();
    common::init_jj_repo(td.path());

    let ctx = Context::discover(td.path()).unwrap();
    let store = Store::open(&ctx).unwrap();
    store.init().unwrap();

    write_external_issue(td.path(), "ext-fail");
    // A write command that fails (unknown revision).
    let code = passthrough::run(
        td.path(),
        &[
            "describe".into(),
            "-r".into(),
            "no-such-revision-zzz".into(),
            "-m".into(),
            "x".into(),
        ],
    )
    .unwrap();
    assert_ne!(code, 0);

    assert!(
        !store
            .list_issue_ids()
            .unwrap()
            .contains(&"ext-fail".to_string()),
        "failed write commands must not sync"
    );
}

#[test]
fn passthrough_outside_a_repo_still_runs() {
    require_jj!();
    let td = tempfile::tempdir().unwrap();
    // No repository here; the shim forwards and reports the backend's
    // failure code instead of erroring itself.
    let code = passthrough::run(td.path(), &["log".into()]).unwrap();
    assert_ne!(code, 0);
}
