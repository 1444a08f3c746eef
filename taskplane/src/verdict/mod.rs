//! Verdict / Judge — deterministic adjudication of worker submissions
//!
//! Validates a submission against its task contract: schema, scope, tests,
//! artifacts. All four checks are evaluated and reported independently; the
//! verdict is derived from them, never hand-edited. Scope and schema
//! failures reject fail-closed regardless of test outcome.

pub mod judge;
pub mod submission;

pub use judge::{Judge, JudgeConfig, NextAction, Verdict, VerdictChecks, VerdictDecision};
pub use submission::{Artifacts, Submission, SubmissionStatus, TestReport};
