//! Decorator shim around the backend CLI.
//!
//! `wj <args...>` forwards everything to `jj` with inherited stdio.
//! When the command was a *write* command and exited 0, it then syncs the
//! wong-db store so externally-made edits to `.wong/` land in the
//! side-channel. The child's exit code always propagates unchanged; sync
//! failures are logged, never folded into the exit code.

use std::path::Path;
use std::time::Instant;

use crate::audit;
use crate::error::Result;
use crate::exec::Cmd;
use crate::store::Store;
use crate::vcs::Vcs;
use crate::vcs::detect::Context;
use crate::vcs::jj::JJ_BIN;

/// Commands that can move history or the working copy. A successful run
/// of any of these triggers a post-command sync.
pub const WRITE_COMMANDS: &[&str] = &[
    "new", "commit", "describe", "squash", "rebase", "edit", "abandon", "restore", "split",
    "absorb", "resolve", "backout", "bookmark", "branch", "git",
];

/// Global jj flags that consume the following argument, so the value must
/// not be mistaken for the command word.
const VALUE_FLAGS: &[&str] = &[
    "-R",
    "--repository",
    "--at-operation",
    "--at-op",
    "--config",
    "--config-file",
];

/// Find the command word: the first argument that is neither a flag nor
/// the value of a value-taking global flag.
pub fn command_word(args: &[String]) -> Option<&str> {
    let mut skip_value = false;
    for arg in args {
        if skip_value {
            skip_value = false;
            continue;
        }
        if arg.starts_with('-') {
            // `--flag=value` carries its value inline and matches nothing
            // in VALUE_FLAGS.
            if VALUE_FLAGS.contains(&arg.as_str()) {
                skip_value = true;
            }
            continue;
        }
        return Some(arg.as_str());
    }
    None
}

/// Whether this invocation can mutate history.
pub fn is_write_command(args: &[String]) -> bool {
    command_word(args).is_some_and(|word| WRITE_COMMANDS.contains(&word))
}

/// Run the decorated backend command, returning the exit code to
/// propagate.
///
/// The post-sync runs only for allowlisted commands that exited 0, and
/// only when the repository has an initialized store; its failure is
/// logged and audited but the backend's exit code is returned regardless.
pub fn run(start_dir: &Path, args: &[String]) -> Result<i32> {
    let display = format!("{JJ_BIN} {}", args.join(" "));

    // Repository context is optional here: `wj git init` runs outside one.
    let ctx = Context::discover(start_dir).ok();
    if let Some(ctx) = &ctx
        && let Ok(common) = ctx.backend().get_common_dir()
    {
        audit::init(&common);
    }

    let started = Instant::now();
    let status = Cmd::new(JJ_BIN)
        .args(args.iter().cloned())
        .current_dir(start_dir)
        .status()?;
    let code = status.code().unwrap_or(1);
    audit::record("passthrough", &display, status.code(), Some(started.elapsed()));

    if !status.success() || !is_write_command(args) {
        return Ok(code);
    }

    if let Some(ctx) = ctx {
        post_sync(&ctx, &display);
    }
    Ok(code)
}

/// Sync the store after a successful write command. Best effort: the
/// store may not be initialized, and a failed sync must not change the
/// exit code the user sees.
fn post_sync(ctx: &Context, trigger: &str) {
    let store = match Store::open(ctx) {
        Ok(store) => store,
        Err(e) => {
            log::debug!("post-sync skipped: {e}");
            return;
        }
    };

    let started = Instant::now();
    match store.sync() {
        Ok(()) => {
            audit::record("post-sync", trigger, Some(0), Some(started.elapsed()));
        }
        Err(e) => {
            log::warn!("post-sync after '{trigger}' failed: {e}");
            audit::record("post-sync", trigger, Some(1), Some(started.elapsed()));
        }
    }
}
