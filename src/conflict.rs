//! Auto-resolving conflict engine for store files.
//!
//! Runs after a subtask squash leaves the default workspace conflicted.
//! Conflicts on store files can be resolved mechanically: JSONL ledgers
//! merge line-by-line, and `.wong/` JSON records take the default
//! workspace's version. Anything else needs a human, so a high-priority
//! tracking issue is built for the store to persist.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::WONG_DIR;
use crate::vcs::jj::JjBackend;
use crate::vcs::{ConflictRecord, Vcs};

/// Classification of a conflicted path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    Content,
    JsonlLines,
    AddAdd,
    ModifyDelete,
}

/// Resolution strategy names, as recorded in tracking issues.
pub const STRATEGY_JSONL_MERGE: &str = "jsonl_merge";
pub const STRATEGY_TAKE_OURS: &str = "take_ours";

/// One classified conflict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictInfo {
    pub path: String,
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    pub auto_resolvable: bool,
    pub resolution_strategy: Option<&'static str>,
    pub subtask_id: String,
}

/// Classify a conflicted path.
///
/// - JSONL ledgers (`issues.jsonl`, `deletions.jsonl`) merge line-by-line.
/// - Other `.wong/` files are whole-record JSON; the default workspace's
///   version wins.
/// - Everything else is source content this engine won't touch.
pub fn categorize_conflict(path: &str, subtask_id: &str) -> ConflictInfo {
    let wong_prefix = format!("{WONG_DIR}/");

    if path.ends_with("issues.jsonl") || path.ends_with("deletions.jsonl") {
        ConflictInfo {
            path: path.to_string(),
            conflict_type: ConflictType::JsonlLines,
            auto_resolvable: true,
            resolution_strategy: Some(STRATEGY_JSONL_MERGE),
            subtask_id: subtask_id.to_string(),
        }
    } else if path.starts_with(&wong_prefix) {
        ConflictInfo {
            path: path.to_string(),
            conflict_type: ConflictType::Content,
            auto_resolvable: true,
            resolution_strategy: Some(STRATEGY_TAKE_OURS),
            subtask_id: subtask_id.to_string(),
        }
    } else {
        ConflictInfo {
            path: path.to_string(),
            conflict_type: ConflictType::Content,
            auto_resolvable: false,
            resolution_strategy: None,
            subtask_id: subtask_id.to_string(),
        }
    }
}

/// What auto-resolution did with one batch of conflicts.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ResolutionOutcome {
    pub auto_resolved: Vec<String>,
    pub manual: Vec<String>,
}

impl ResolutionOutcome {
    pub fn fully_resolved(&self) -> bool {
        self.manual.is_empty()
    }
}

/// Classify and auto-resolve a batch of conflicted paths in the default
/// workspace.
///
/// `jsonl_merge` asks the backend's line-level merge machinery to resolve
/// the path; if that fails, the path is restored from `@-` (the pre-squash
/// state), abandoning the subtask's conflicting write while keeping the
/// trail auditable. `take_ours` restores from `@-` directly.
pub fn auto_resolve(
    jj: &JjBackend,
    conflicts: &[ConflictRecord],
    subtask_id: &str,
) -> Result<(Vec<ConflictInfo>, ResolutionOutcome)> {
    let infos: Vec<ConflictInfo> = conflicts
        .iter()
        .map(|c| categorize_conflict(&c.path, subtask_id))
        .collect();

    let mut outcome = ResolutionOutcome::default();
    for info in &infos {
        match info.resolution_strategy {
            Some(STRATEGY_JSONL_MERGE) => {
                if jj.run(&["resolve", &info.path]).is_err() {
                    log::debug!(
                        "line merge failed for {}, restoring pre-squash copy",
                        info.path
                    );
                    jj.checkout_file("@-", std::path::Path::new(&info.path))?;
                }
                outcome.auto_resolved.push(info.path.clone());
            }
            Some(STRATEGY_TAKE_OURS) => {
                jj.checkout_file("@-", std::path::Path::new(&info.path))?;
                outcome.auto_resolved.push(info.path.clone());
            }
            _ => outcome.manual.push(info.path.clone()),
        }
    }

    Ok((infos, outcome))
}

/// Build the tracking record for conflicts that need a human.
///
/// The record is opaque JSON as far as the store is concerned; only the
/// issue layer above interprets its fields. Returns `(issue_id, record)`.
pub fn tracking_record(
    subtask_id: &str,
    subtask_description: &str,
    outcome: &ResolutionOutcome,
) -> (String, serde_json::Value) {
    let id = crate::orchestrator::generate_task_id("conflict");

    let mut description = format!(
        "Subtask '{subtask_id}' ({subtask_description}) could not be merged cleanly.\n\n"
    );
    if !outcome.auto_resolved.is_empty() {
        description.push_str("Auto-resolved:\n");
        for path in &outcome.auto_resolved {
            description.push_str(&format!("  - {path}\n"));
        }
        description.push('\n');
    }
    description.push_str("Needs manual resolution:\n");
    for path in &outcome.manual {
        description.push_str(&format!("  - {path}\n"));
    }
    description.push_str("\nSuggested commands:\n");
    for path in &outcome.manual {
        description.push_str(&format!("  jj resolve {path}\n"));
    }

    let record = serde_json::json!({
        "id": id,
        "title": format!("CONFLICT: Resolve conflicts from {subtask_id}"),
        "type": "bug",
        "priority": 0,
        "status": "open",
        "description": description,
        "created_at": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    });

    (id, record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_jsonl() {
        let info = categorize_conflict(".wong/issues.jsonl", "task-1a2b3c");
        assert_eq!(info.conflict_type, ConflictType::JsonlLines);
        assert!(info.auto_resolvable);
        assert_eq!(info.resolution_strategy, Some(STRATEGY_JSONL_MERGE));

        let info = categorize_conflict("logs/deletions.jsonl", "task-1a2b3c");
        assert_eq!(info.conflict_type, ConflictType::JsonlLines);
    }

    #[test]
    fn test_categorize_wong_content() {
        let info = categorize_conflict(".wong/issues/x.json", "task-1a2b3c");
        assert_eq!(info.conflict_type, ConflictType::Content);
        assert!(info.auto_resolvable);
        assert_eq!(info.resolution_strategy, Some(STRATEGY_TAKE_OURS));
        assert_eq!(info.subtask_id, "task-1a2b3c");
    }

    #[test]
    fn test_categorize_source_file_is_manual() {
        let info = categorize_conflict("src/main.rs", "task-1a2b3c");
        assert_eq!(info.conflict_type, ConflictType::Content);
        assert!(!info.auto_resolvable);
        assert!(info.resolution_strategy.is_none());
    }

    #[test]
    fn test_categorize_wong_prefix_must_be_directory() {
        // A sibling like `.wonga/` must not match the `.wong/` rule.
        let info = categorize_conflict(".wonga/file.json", "t");
        assert!(!info.auto_resolvable);
    }

    #[test]
    fn test_tracking_record_shape() {
        let outcome = ResolutionOutcome {
            auto_resolved: vec![".wong/issues/a.json".into()],
            manual: vec!["src/lib.rs".into()],
        };
        let (id, record) = tracking_record("task-1a2b3c-d4e5f6", "port the parser", &outcome);

        assert!(id.starts_with("conflict-"));
        assert_eq!(record["id"], serde_json::Value::String(id.clone()));
        assert_eq!(
            record["title"],
            "CONFLICT: Resolve conflicts from task-1a2b3c-d4e5f6"
        );
        assert_eq!(record["type"], "bug");
        assert_eq!(record["priority"], 0);

        let description = record["description"].as_str().unwrap();
        assert!(description.contains("Auto-resolved:"));
        assert!(description.contains(".wong/issues/a.json"));
        assert!(description.contains("jj resolve src/lib.rs"));
    }

    #[test]
    fn test_outcome_fully_resolved() {
        let outcome = ResolutionOutcome {
            auto_resolved: vec!["a".into()],
            manual: vec![],
        };
        assert!(outcome.fully_resolved());

        let outcome = ResolutionOutcome {
            auto_resolved: vec![],
            manual: vec!["b".into()],
        };
        assert!(!outcome.fully_resolved());
    }
}
