//! `wj`: the wong decorator for jj.
//!
//! Forwards its arguments to `jj` untouched (no flag parsing of its own)
//! and syncs the wong-db store after successful write commands. The
//! backend's exit code propagates unchanged.

use std::process::ExitCode;

use anyhow::Context as _;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match run() {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(e) => {
            eprintln!("wj: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn run() -> anyhow::Result<i32> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cwd = std::env::current_dir().context("cannot determine current directory")?;
    wong::passthrough::run(&cwd, &args).context("failed to run backend command")
}
