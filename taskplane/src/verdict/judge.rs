//! The judge: four independent checks, one deterministic verdict

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::board::task::Task;
use crate::breach::BreachCode;

use super::submission::{Submission, SubmissionStatus};

/// Terminal or retry adjudication of one submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictDecision {
    Done,
    Retry,
    Escalate,
    Reject,
}

impl std::fmt::Display for VerdictDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Done => "DONE",
            Self::Retry => "RETRY",
            Self::Escalate => "ESCALATE",
            Self::Reject => "REJECT",
        };
        write!(f, "{}", s)
    }
}

/// What the orchestrator should do with the verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    CloseTask,
    RequeueTask,
    EscalateTask,
    RejectSubmission,
}

/// The four mandatory checks, each evaluated and reported independently
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VerdictChecks {
    pub schema_valid: bool,
    pub scope_clean: bool,
    pub tests_passed: bool,
    pub artifacts_complete: bool,
}

impl VerdictChecks {
    pub fn all_pass(&self) -> bool {
        self.schema_valid && self.scope_clean && self.tests_passed && self.artifacts_complete
    }
}

/// Deterministic adjudication record; the judge is its only writer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub task_id: String,
    pub verdict: VerdictDecision,
    /// Breach behind a non-DONE verdict
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breach: Option<BreachCode>,
    pub reason: String,
    pub checks: VerdictChecks,
    pub next_action: NextAction,
}

/// Judge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    /// Roles whose submissions need no test evidence (doc writers,
    /// reviewers); every other role is patch-producing
    pub non_patch_roles: Vec<String>,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            non_patch_roles: vec!["docs".to_string(), "reviewer".to_string()],
        }
    }
}

/// Evaluates submissions against task contracts
pub struct Judge {
    config: JudgeConfig,
}

impl Judge {
    pub fn new() -> Self {
        Self {
            config: JudgeConfig::default(),
        }
    }

    pub fn with_config(config: JudgeConfig) -> Self {
        Self { config }
    }

    /// Adjudicate a raw submission body. An unparseable body fails every
    /// check and rejects with `SCHEMA_VIOLATION`.
    pub fn evaluate_value(&self, task: &Task, raw: &serde_json::Value) -> Verdict {
        match Submission::parse(raw) {
            Ok(submission) => self.evaluate(task, &submission),
            Err(message) => Verdict {
                task_id: task.id.clone(),
                verdict: VerdictDecision::Reject,
                breach: Some(BreachCode::SchemaViolation),
                reason: format!("submission failed schema validation: {}", message),
                checks: VerdictChecks {
                    schema_valid: false,
                    scope_clean: false,
                    tests_passed: false,
                    artifacts_complete: false,
                },
                next_action: NextAction::RejectSubmission,
            },
        }
    }

    /// Adjudicate a parsed submission.
    ///
    /// All four checks run regardless of earlier failures so the verdict
    /// reports the full picture; the decision is then derived from them.
    pub fn evaluate(&self, task: &Task, submission: &Submission) -> Verdict {
        let schema_valid = submission.task_id == task.id;
        let scope_violations = self.scope_violations(task, submission);
        let scope_clean = scope_violations.is_empty();
        let tests_passed = self.tests_pass(task, submission);
        let artifacts_complete = submission.artifacts.is_complete();

        let checks = VerdictChecks {
            schema_valid,
            scope_clean,
            tests_passed,
            artifacts_complete,
        };

        let (verdict, breach, reason) = if !scope_clean {
            // Fail-closed, regardless of test outcome, never auto-repaired
            (
                VerdictDecision::Reject,
                Some(BreachCode::ScopeConflict),
                format!("files outside pins: {:?}", scope_violations),
            )
        } else if !schema_valid {
            (
                VerdictDecision::Reject,
                Some(BreachCode::SchemaViolation),
                format!(
                    "submission task_id {} does not match task {}",
                    submission.task_id, task.id
                ),
            )
        } else if submission.status == SubmissionStatus::NeedInput {
            (
                VerdictDecision::Escalate,
                Some(BreachCode::PinsInsufficient),
                format!("worker needs input: {}", submission.needs_input.join("; ")),
            )
        } else if !tests_passed || !artifacts_complete {
            let breach = if tests_passed {
                BreachCode::ArtifactMissing
            } else {
                BreachCode::CiFailed
            };
            let reason = if tests_passed {
                format!("artifacts missing: {:?}", submission.artifacts.missing())
            } else {
                format!("tests failed: {}", submission.tests.summary)
            };
            if task.attempts + 1 < task.max_attempts {
                (VerdictDecision::Retry, Some(breach), reason)
            } else {
                (
                    VerdictDecision::Escalate,
                    Some(breach),
                    format!("{} (attempts exhausted)", reason),
                )
            }
        } else {
            (
                VerdictDecision::Done,
                None,
                "all checks passed".to_string(),
            )
        };

        let next_action = match verdict {
            VerdictDecision::Done => NextAction::CloseTask,
            VerdictDecision::Retry => NextAction::RequeueTask,
            VerdictDecision::Escalate => NextAction::EscalateTask,
            VerdictDecision::Reject => NextAction::RejectSubmission,
        };

        debug!(
            task_id = %task.id,
            verdict = %verdict,
            schema_valid,
            scope_clean,
            tests_passed,
            artifacts_complete,
            "Verdict issued"
        );

        Verdict {
            task_id: task.id.clone(),
            verdict,
            breach,
            reason,
            checks,
            next_action,
        }
    }

    /// Written files that escape the allow set or touch the forbid set
    fn scope_violations(&self, task: &Task, submission: &Submission) -> Vec<String> {
        submission
            .written_files()
            .filter(|path| !task.pins.permits(path))
            .cloned()
            .collect()
    }

    /// Tests pass when the worker says so AND, for patch-producing roles,
    /// at least one declared command is non-trivial
    fn tests_pass(&self, task: &Task, submission: &Submission) -> bool {
        if !submission.tests.passed {
            return false;
        }
        if self.config.non_patch_roles.contains(&task.role) {
            return true;
        }
        submission
            .tests
            .commands
            .iter()
            .any(|c| !is_trivial_command(c))
    }
}

impl Default for Judge {
    fn default() -> Self {
        Self::new()
    }
}

/// Commands that prove nothing: empty, `true`, `:`, bare echoes
fn is_trivial_command(command: &str) -> bool {
    let trimmed = command.trim();
    trimmed.is_empty()
        || trimmed == "true"
        || trimmed == ":"
        || trimmed == "echo"
        || trimmed.starts_with("echo ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::task::{Pins, Task, TaskKind, TaskSpec, TaskType};
    use serde_json::json;

    fn task(allowed: &[&str], forbidden: &[&str], max_attempts: u32) -> Task {
        Task::new(
            TaskSpec {
                title: "t".to_string(),
                goal: "do the thing".to_string(),
                role: "coder".to_string(),
                kind: Some(TaskKind::Atomic),
                task_type: TaskType::Fix,
                lane: None,
                pins: Pins::new(
                    allowed.iter().map(|s| s.to_string()).collect(),
                    forbidden.iter().map(|s| s.to_string()).collect(),
                ),
                allowed_executors: vec![],
                allowed_models: vec![],
                files: vec![],
                max_attempts: Some(max_attempts),
            },
            TaskKind::Atomic,
            3,
        )
    }

    fn submission_json(task: &Task, changed: &[&str], passed: bool) -> serde_json::Value {
        json!({
            "task_id": task.id,
            "status": "DONE",
            "changed_files": changed,
            "tests": {"commands": ["cargo test"], "passed": passed, "summary": "ran"},
            "artifacts": {"report": "out/report.md", "log": "out/run.log",
                          "diff": "out/changes.diff", "submission": "out/submission.json"},
            "exit_code": 0
        })
    }

    #[test]
    fn test_all_checks_pass_is_done() {
        let judge = Judge::new();
        let task = task(&["src/a.rs"], &[], 3);
        let verdict = judge.evaluate_value(&task, &submission_json(&task, &["src/a.rs"], true));

        assert_eq!(verdict.verdict, VerdictDecision::Done);
        assert!(verdict.checks.all_pass());
        assert_eq!(verdict.next_action, NextAction::CloseTask);
    }

    #[test]
    fn test_scope_breach_rejects_despite_passing_tests() {
        let judge = Judge::new();
        let task = task(&["src/a.rs"], &[], 3);
        let verdict = judge.evaluate_value(
            &task,
            &submission_json(&task, &["src/a.rs", "src/b.rs"], true),
        );

        assert_eq!(verdict.verdict, VerdictDecision::Reject);
        assert_eq!(verdict.breach, Some(BreachCode::ScopeConflict));
        assert!(!verdict.checks.scope_clean);
        // The other checks are still evaluated and reported
        assert!(verdict.checks.tests_passed);
        assert!(verdict.checks.artifacts_complete);
    }

    #[test]
    fn test_forbidden_path_rejects() {
        let judge = Judge::new();
        let task = task(&["src"], &["src/gen"], 3);
        let verdict =
            judge.evaluate_value(&task, &submission_json(&task, &["src/gen/out.rs"], true));

        assert_eq!(verdict.verdict, VerdictDecision::Reject);
        assert_eq!(verdict.breach, Some(BreachCode::ScopeConflict));
    }

    #[test]
    fn test_unparseable_submission_rejects_on_schema() {
        let judge = Judge::new();
        let task = task(&["src/a.rs"], &[], 3);
        let verdict = judge.evaluate_value(&task, &json!({"garbage": true}));

        assert_eq!(verdict.verdict, VerdictDecision::Reject);
        assert_eq!(verdict.breach, Some(BreachCode::SchemaViolation));
        assert!(!verdict.checks.schema_valid);
    }

    #[test]
    fn test_test_failure_retries_with_budget() {
        let judge = Judge::new();
        let task = task(&["src/a.rs"], &[], 3);
        let verdict = judge.evaluate_value(&task, &submission_json(&task, &["src/a.rs"], false));

        assert_eq!(verdict.verdict, VerdictDecision::Retry);
        assert_eq!(verdict.breach, Some(BreachCode::CiFailed));
        assert_eq!(verdict.next_action, NextAction::RequeueTask);
    }

    #[test]
    fn test_test_failure_escalates_when_exhausted() {
        let judge = Judge::new();
        let mut task = task(&["src/a.rs"], &[], 3);
        task.attempts = 2; // the failing attempt is the last one

        let verdict = judge.evaluate_value(&task, &submission_json(&task, &["src/a.rs"], false));
        assert_eq!(verdict.verdict, VerdictDecision::Escalate);
    }

    #[test]
    fn test_trivial_test_commands_do_not_count() {
        let judge = Judge::new();
        let task = task(&["src/a.rs"], &[], 3);
        let value = json!({
            "task_id": task.id,
            "status": "DONE",
            "changed_files": ["src/a.rs"],
            "tests": {"commands": ["true", "echo done"], "passed": true, "summary": ""},
            "artifacts": {"report": "r", "log": "l", "diff": "d", "submission": "s"},
        });

        let verdict = judge.evaluate_value(&task, &value);
        assert!(!verdict.checks.tests_passed);
        assert_eq!(verdict.breach, Some(BreachCode::CiFailed));
    }

    #[test]
    fn test_doc_roles_exempt_from_test_evidence() {
        let judge = Judge::new();
        let mut task = task(&["docs/guide.md"], &[], 3);
        task.role = "docs".to_string();
        let value = json!({
            "task_id": task.id,
            "status": "DONE",
            "changed_files": ["docs/guide.md"],
            "tests": {"commands": [], "passed": true, "summary": "n/a"},
            "artifacts": {"report": "r", "log": "l", "diff": "d", "submission": "s"},
        });

        let verdict = judge.evaluate_value(&task, &value);
        assert_eq!(verdict.verdict, VerdictDecision::Done);
    }

    #[test]
    fn test_missing_artifacts_retry_then_escalate() {
        let judge = Judge::new();
        let task = task(&["src/a.rs"], &[], 3);
        let value = json!({
            "task_id": task.id,
            "status": "DONE",
            "changed_files": ["src/a.rs"],
            "tests": {"commands": ["cargo test"], "passed": true, "summary": "ok"},
            "artifacts": {"report": "r", "log": "l"},
        });

        let verdict = judge.evaluate_value(&task, &value);
        assert_eq!(verdict.verdict, VerdictDecision::Retry);
        assert_eq!(verdict.breach, Some(BreachCode::ArtifactMissing));
        assert!(!verdict.checks.artifacts_complete);
    }

    #[test]
    fn test_need_input_escalates() {
        let judge = Judge::new();
        let task = task(&["src/a.rs"], &[], 3);
        let value = json!({
            "task_id": task.id,
            "status": "NEED_INPUT",
            "tests": {"commands": [], "passed": false, "summary": ""},
            "needs_input": ["which schema version applies?"],
        });

        let verdict = judge.evaluate_value(&task, &value);
        assert_eq!(verdict.verdict, VerdictDecision::Escalate);
        assert_eq!(verdict.breach, Some(BreachCode::PinsInsufficient));
    }

    #[test]
    fn test_mismatched_task_id_is_schema_reject() {
        let judge = Judge::new();
        let task = task(&["src/a.rs"], &[], 3);
        let mut value = submission_json(&task, &["src/a.rs"], true);
        value["task_id"] = json!("some-other-task");

        let verdict = judge.evaluate_value(&task, &value);
        assert_eq!(verdict.verdict, VerdictDecision::Reject);
        assert_eq!(verdict.breach, Some(BreachCode::SchemaViolation));
    }
}
