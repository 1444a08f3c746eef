//! Submission — the structured work product a worker posts back

use serde::{Deserialize, Serialize};

/// Worker-reported outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Done,
    NeedInput,
    Failed,
}

/// Declared test evidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    /// Commands the worker claims to have run
    #[serde(default)]
    pub commands: Vec<String>,
    pub passed: bool,
    #[serde(default)]
    pub summary: String,
}

/// Required evidence files produced alongside the patch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Artifacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission: Option<String>,
}

impl Artifacts {
    /// All four evidence files present and non-empty
    pub fn is_complete(&self) -> bool {
        [&self.report, &self.log, &self.diff, &self.submission]
            .iter()
            .all(|a| a.as_deref().is_some_and(|p| !p.trim().is_empty()))
    }

    /// Names of the missing or empty entries
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        for (name, value) in [
            ("report", &self.report),
            ("log", &self.log),
            ("diff", &self.diff),
            ("submission", &self.submission),
        ] {
            if !value.as_deref().is_some_and(|p| !p.trim().is_empty()) {
                missing.push(name);
            }
        }
        missing
    }
}

/// The structured result a worker posts on completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub task_id: String,
    pub status: SubmissionStatus,
    #[serde(default)]
    pub changed_files: Vec<String>,
    #[serde(default)]
    pub new_files: Vec<String>,
    pub tests: TestReport,
    #[serde(default)]
    pub artifacts: Artifacts,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub needs_input: Vec<String>,
}

impl Submission {
    /// Parse and structurally validate a raw submission body.
    ///
    /// Serde enforces field presence and types; the extra checks catch
    /// well-typed nonsense (empty task id).
    pub fn parse(value: &serde_json::Value) -> Result<Self, String> {
        let submission: Submission =
            serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
        if submission.task_id.trim().is_empty() {
            return Err("task_id is empty".to_string());
        }
        Ok(submission)
    }

    /// Every path the worker claims to have written
    pub fn written_files(&self) -> impl Iterator<Item = &String> {
        self.changed_files.iter().chain(self.new_files.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_valid_submission() {
        let value = json!({
            "task_id": "task-1",
            "status": "DONE",
            "changed_files": ["src/a.rs"],
            "tests": {"commands": ["cargo test"], "passed": true, "summary": "12 passed"},
            "artifacts": {"report": "out/report.md", "log": "out/run.log",
                          "diff": "out/changes.diff", "submission": "out/submission.json"},
            "exit_code": 0
        });
        let submission = Submission::parse(&value).unwrap();
        assert_eq!(submission.status, SubmissionStatus::Done);
        assert!(submission.artifacts.is_complete());
    }

    #[test]
    fn test_parse_rejects_missing_tests() {
        let value = json!({"task_id": "task-1", "status": "DONE"});
        assert!(Submission::parse(&value).is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_status() {
        let value = json!({
            "task_id": "task-1",
            "status": "MAYBE",
            "tests": {"passed": true}
        });
        assert!(Submission::parse(&value).is_err());
    }

    #[test]
    fn test_parse_rejects_empty_task_id() {
        let value = json!({
            "task_id": "  ",
            "status": "DONE",
            "tests": {"passed": true}
        });
        assert!(Submission::parse(&value).is_err());
    }

    #[test]
    fn test_artifacts_missing_names() {
        let artifacts = Artifacts {
            report: Some("r.md".to_string()),
            log: Some("".to_string()),
            diff: None,
            submission: Some("s.json".to_string()),
        };
        assert!(!artifacts.is_complete());
        assert_eq!(artifacts.missing(), vec!["log", "diff"]);
    }

    #[test]
    fn test_written_files_spans_changed_and_new() {
        let value = json!({
            "task_id": "task-1",
            "status": "DONE",
            "changed_files": ["src/a.rs"],
            "new_files": ["src/b.rs"],
            "tests": {"passed": true}
        });
        let submission = Submission::parse(&value).unwrap();
        let written: Vec<&String> = submission.written_files().collect();
        assert_eq!(written.len(), 2);
    }
}
