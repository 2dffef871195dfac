//! Child-process execution for backend drivers.
//!
//! Every backend operation shells out through [`Cmd`]: arguments are always
//! passed as a vector (never through `sh -c`), the working directory is the
//! repository root, stdout/stderr are captured into bounded buffers, and the
//! wait loop honors a [`CancelToken`] so a deadline or explicit cancellation
//! kills the child instead of blocking forever.

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

use crate::error::{Error, Result};

/// Captured output beyond this many bytes per stream is discarded.
/// Issue payloads and diffs fit comfortably; a runaway child cannot
/// exhaust memory.
const CAPTURE_LIMIT: usize = 8 * 1024 * 1024;

/// How often the wait loop checks the cancel token.
const WAIT_POLL: Duration = Duration::from_millis(50);

/// Cooperative cancellation with an optional deadline.
///
/// Cloning shares the underlying flag: cancelling any clone cancels all of
/// them. The token is checked between blocking waits on child processes and
/// before lock acquisition; it cannot interrupt a single `flock` call.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token that never fires.
    pub fn never() -> Self {
        Self::default()
    }

    /// A token that fires after `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// True once cancelled or past the deadline.
    pub fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Return `Err(Cancelled)` if the token has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Output of a finished child process.
#[derive(Debug)]
pub struct CmdOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CmdOutput {
    pub fn stdout_utf8(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_utf8(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }
}

/// Builder for a single backend invocation.
pub struct Cmd {
    program: String,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    env_remove: Vec<&'static str>,
    cancel: CancelToken,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env_remove: Vec::new(),
            cancel: CancelToken::never(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Remove a variable from the child's environment.
    pub fn env_remove(mut self, var: &'static str) -> Self {
        self.env_remove.push(var);
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// A loggable rendering of the invocation.
    pub fn display(&self) -> String {
        let mut s = self.program.clone();
        for a in &self.args {
            s.push(' ');
            s.push_str(&a.to_string_lossy());
        }
        s
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for var in &self.env_remove {
            cmd.env_remove(var);
        }
        cmd
    }

    /// Run to completion, capturing stdout and stderr.
    ///
    /// Stream reads happen on helper threads so a chatty child never
    /// deadlocks against a full pipe. The wait loop polls the cancel token;
    /// on cancellation the child is killed and `Error::Cancelled` returned.
    pub fn output(self) -> Result<CmdOutput> {
        self.cancel.check()?;
        log::debug!("exec: {}", self.display());

        let mut command = self.command();
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to spawn '{}': {e}", self.program),
            ))
        })?;

        let stdout = child.stdout.take().map(|r| spawn_reader(r));
        let stderr = child.stderr.take().map(|r| spawn_reader(r));

        let status = loop {
            match child.wait_timeout(WAIT_POLL)? {
                Some(status) => break status,
                None => {
                    if self.cancel.is_cancelled() {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(Error::Cancelled);
                    }
                }
            }
        };

        let stdout = stdout.map(join_reader).unwrap_or_default();
        let stderr = stderr.map(join_reader).unwrap_or_default();

        Ok(CmdOutput {
            status,
            stdout,
            stderr,
        })
    }

    /// Run with inherited stdio, returning only the exit status.
    ///
    /// Used by the decorator: the child owns the terminal for interactive
    /// commands, so nothing is captured.
    pub fn status(self) -> Result<ExitStatus> {
        self.cancel.check()?;
        log::debug!("exec (inherit): {}", self.display());

        let mut child = self.command().spawn().map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to spawn '{}': {e}", self.program),
            ))
        })?;

        loop {
            match child.wait_timeout(WAIT_POLL)? {
                Some(status) => return Ok(status),
                None => {
                    if self.cancel.is_cancelled() {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(Error::Cancelled);
                    }
                }
            }
        }
    }
}

/// Drain a pipe on a helper thread, keeping at most [`CAPTURE_LIMIT`] bytes.
fn spawn_reader<R: Read + Send + 'static>(mut reader: R) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if buf.len() < CAPTURE_LIMIT {
                        let take = n.min(CAPTURE_LIMIT - buf.len());
                        buf.extend_from_slice(&chunk[..take]);
                    }
                    // Past the cap: keep draining so the child doesn't block.
                }
            }
        }
        buf
    })
}

fn join_reader(handle: std::thread::JoinHandle<Vec<u8>>) -> Vec<u8> {
    handle.join().unwrap_or_default()
}

/// Run a command at `cwd`, returning stdout on success.
///
/// Non-zero exit maps to [`Error::CommandFailed`] carrying the trimmed
/// stderr. This is the plain-path helper; backends with retry policies
/// wrap [`Cmd`] directly.
pub fn run_capture(
    backend: &'static str,
    program: &str,
    args: &[&str],
    cwd: &Path,
    cancel: &CancelToken,
) -> Result<String> {
    let output = Cmd::new(program)
        .args(args.iter().copied())
        .current_dir(cwd)
        .cancel_token(cancel.clone())
        .output()?;

    if output.success() {
        Ok(output.stdout_utf8())
    } else {
        let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        Err(Error::command_failed(
            backend,
            &owned,
            output.stderr_utf8().trim(),
            output.code(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_flag() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        assert!(token.check().is_err());
    }

    #[test]
    fn test_cancel_token_clone_shares_flag() {
        let token = CancelToken::never();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_token_deadline() {
        let token = CancelToken::with_timeout(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(token.is_cancelled());

        let token = CancelToken::with_timeout(Duration::from_secs(3600));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_display_joins_args() {
        let cmd = Cmd::new("jj").args(["log", "-r", "@"]);
        assert_eq!(cmd.display(), "jj log -r @");
    }

    #[test]
    #[cfg(unix)]
    fn test_output_captures_streams() {
        let out = Cmd::new("sh")
            .args(["-c", "echo out; echo err >&2"])
            .output()
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout_utf8(), "out\n");
        assert_eq!(out.stderr_utf8(), "err\n");
    }

    #[test]
    #[cfg(unix)]
    fn test_output_nonzero_exit() {
        let out = Cmd::new("sh").args(["-c", "exit 3"]).output().unwrap();
        assert!(!out.success());
        assert_eq!(out.code(), Some(3));
    }

    #[test]
    #[cfg(unix)]
    fn test_cancelled_before_spawn() {
        let token = CancelToken::never();
        token.cancel();
        let err = Cmd::new("sh")
            .args(["-c", "sleep 10"])
            .cancel_token(token)
            .output()
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    #[cfg(unix)]
    fn test_deadline_kills_child() {
        let start = Instant::now();
        let err = Cmd::new("sh")
            .args(["-c", "sleep 30"])
            .cancel_token(CancelToken::with_timeout(Duration::from_millis(100)))
            .output()
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    #[cfg(unix)]
    fn test_run_capture_maps_failure() {
        let dir = std::env::temp_dir();
        let err = run_capture(
            "git",
            "sh",
            &["-c", "echo boom >&2; exit 1"],
            &dir,
            &CancelToken::never(),
        )
        .unwrap_err();
        match err {
            Error::CommandFailed { stderr, code, .. } => {
                assert_eq!(stderr, "boom");
                assert_eq!(code, Some(1));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
