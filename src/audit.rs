//! Always-on audit log for decorated backend commands.
//!
//! The `wj` shim records every write command it passes through, and each
//! post-command sync outcome, to `{vcs_common_dir}/wong-logs/commands.jsonl`.
//! The trail answers "which command moved the side-channel" without
//! requiring verbose logging.
//!
//! # Growth control
//!
//! Before each write the file size is checked; past 1MB the current file
//! rotates to `commands.jsonl.old` and a fresh one starts, bounding
//! storage to ~2MB.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

/// Maximum log file size before rotation (1MB).
const MAX_LOG_SIZE: u64 = 1_048_576;

/// Maximum bytes of a command line kept in one log entry.
const MAX_CMD_BYTES: usize = 2000;

static AUDIT_LOG: OnceLock<Mutex<Option<AuditLog>>> = OnceLock::new();

struct AuditLog {
    log_path: PathBuf,
    file: Option<File>,
}

/// Initialize the audit log. Call once after the repository's common dir
/// is known; the file and directory are created lazily on first write.
pub fn init(common_dir: &Path) {
    let logger = AuditLog {
        log_path: common_dir.join("wong-logs").join("commands.jsonl"),
        file: None,
    };
    // Set fails if already initialized; keep the first target.
    let _ = AUDIT_LOG.set(Mutex::new(Some(logger)));
}

/// Record one event.
///
/// - `label`: what happened ("passthrough", "post-sync")
/// - `command`: the backend command line (clipped to 2000 bytes)
/// - `exit_code`: `None` when the process was killed by a signal
pub fn record(label: &str, command: &str, exit_code: Option<i32>, duration: Option<Duration>) {
    let Some(mutex) = AUDIT_LOG.get() else {
        return;
    };
    let Ok(mut guard) = mutex.lock() else {
        return;
    };
    let Some(logger) = guard.as_mut() else {
        return;
    };

    rotate_if_oversized(logger);

    if logger.file.is_none() {
        if let Some(parent) = logger.log_path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        logger.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&logger.log_path)
            .ok();
    }

    let Some(file) = logger.file.as_mut() else {
        return;
    };

    let ts = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let entry = serde_json::json!({
        "ts": ts,
        "label": label,
        "cmd": clip_command(command),
        "exit": exit_code,
        "dur_ms": duration.map(|d| d.as_millis() as u64),
    });

    // Single write_all so concurrent wj processes don't interleave.
    let mut buf = entry.to_string();
    buf.push('\n');
    let _ = file.write_all(buf.as_bytes());
}

/// Swap a full log file out of the way and force a reopen.
fn rotate_if_oversized(logger: &mut AuditLog) {
    let oversized = fs::metadata(&logger.log_path)
        .map(|m| m.len() > MAX_LOG_SIZE)
        .unwrap_or(false);
    if oversized {
        let _ = fs::rename(
            &logger.log_path,
            logger.log_path.with_extension("jsonl.old"),
        );
        logger.file = None;
    }
}

/// Keep at most [`MAX_CMD_BYTES`] of the command line. The cut lands on a
/// char boundary and is marked with a trailing `[truncated]`; short
/// commands pass through unallocated.
fn clip_command(command: &str) -> std::borrow::Cow<'_, str> {
    if command.len() <= MAX_CMD_BYTES {
        return std::borrow::Cow::Borrowed(command);
    }
    let mut end = MAX_CMD_BYTES;
    while !command.is_char_boundary(end) {
        end -= 1;
    }
    std::borrow::Cow::Owned(format!("{} [truncated]", &command[..end]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_command() {
        let long = "x".repeat(MAX_CMD_BYTES * 2);
        let clipped = clip_command(&long);
        assert!(clipped.len() < long.len());
        assert!(clipped.ends_with("[truncated]"));

        // Multibyte input is cut on a char boundary, never mid-codepoint.
        let wide = "é".repeat(MAX_CMD_BYTES);
        let clipped = clip_command(&wide);
        assert!(clipped.ends_with("[truncated]"));
        assert!(clipped.starts_with('é'));

        let short = "jj describe -m msg";
        assert_eq!(clip_command(short), short);
    }

    #[test]
    fn test_record_without_init_is_silent() {
        record("passthrough", "jj new", Some(0), None);
    }

    #[test]
    fn test_entry_format() {
        let entry = serde_json::json!({
            "ts": "2026-07-01T12:00:00Z",
            "label": "post-sync",
            "cmd": "jj describe -m msg",
            "exit": 0,
            "dur_ms": 41_u64,
        });
        let parsed: serde_json::Value = serde_json::from_str(&entry.to_string()).unwrap();
        assert_eq!(parsed["label"], "post-sync");
        assert_eq!(parsed["exit"], 0);
    }
}
