//! Breach taxonomy — machine-readable failure codes for the control plane
//!
//! Every terminal failure, verdict, and escalation decision carries one of
//! these codes. The classification determines propagation: local breaches
//! are absorbed and retried inside the queue, trust-boundary breaches are
//! surfaced to the escalation engine and never downgraded to warnings.

use serde::{Deserialize, Serialize};

/// Machine-readable breach codes carried on verdicts, jobs, and events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreachCode {
    /// A changed/new file escaped the task's pins (allow/forbid sets)
    ScopeConflict,
    /// Submission failed structural validation against the contract
    SchemaViolation,
    /// A required artifact (report/log/diff/submission) is absent or empty
    ArtifactMissing,
    /// Declared tests did not pass (or no non-trivial test command ran)
    CiFailed,
    /// Token/cost budget exceeded
    BudgetExceeded,
    /// Job exceeded its lease or wall-clock timeout
    TimeoutExceeded,
    /// Worker/executor infrastructure failure (crash, nonzero infra exit)
    ExecutorError,
    /// Worker acted outside protocol (e.g. completing a job it never claimed)
    PolicyViolation,
    /// The declared pins cannot contain the work; the system must widen scope
    PinsInsufficient,
    /// Hard rule violation; abort without retry
    ConstitutionViolation,
    /// A second active job was requested for a task (no-op guard)
    DuplicateDispatch,
    /// An illegal task state transition was requested (no-op guard)
    InvalidTransition,
}

/// Coarse breach class, used for propagation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachClass {
    /// Fatal, never auto-repaired
    Scope,
    /// Fatal per-attempt, retryable with a fresh attempt
    Contract,
    /// Retryable up to `max_attempts`
    Quality,
    /// Immediate escalate/abort, never blindly retried
    Resource,
    /// Auto-retried with backoff up to a small cap, then escalated
    Infrastructure,
    /// Immediate human escalation, no retry
    Policy,
    /// Local guard errors; no state mutated, nothing to escalate
    Local,
}

impl BreachCode {
    /// Classify this code for propagation policy
    pub fn class(&self) -> BreachClass {
        match self {
            Self::ScopeConflict => BreachClass::Scope,
            Self::SchemaViolation | Self::ArtifactMissing => BreachClass::Contract,
            Self::CiFailed => BreachClass::Quality,
            Self::BudgetExceeded | Self::TimeoutExceeded => BreachClass::Resource,
            Self::ExecutorError => BreachClass::Infrastructure,
            Self::PolicyViolation | Self::ConstitutionViolation | Self::PinsInsufficient => {
                BreachClass::Policy
            }
            Self::DuplicateDispatch | Self::InvalidTransition => BreachClass::Local,
        }
    }

    /// Whether a fresh attempt may be scheduled for this breach
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            BreachClass::Contract | BreachClass::Quality | BreachClass::Infrastructure
        )
    }

    /// Whether this breach consumes the task's quality retry budget.
    ///
    /// Scope breaches are tracked on a separate counter so a worker that
    /// ignores its pins cannot burn the task's legitimate retries.
    pub fn consumes_attempt(&self) -> bool {
        matches!(
            self,
            Self::CiFailed | Self::ArtifactMissing | Self::SchemaViolation
        )
    }
}

impl std::fmt::Display for BreachCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ScopeConflict => "SCOPE_CONFLICT",
            Self::SchemaViolation => "SCHEMA_VIOLATION",
            Self::ArtifactMissing => "ARTIFACT_MISSING",
            Self::CiFailed => "CI_FAILED",
            Self::BudgetExceeded => "BUDGET_EXCEEDED",
            Self::TimeoutExceeded => "TIMEOUT_EXCEEDED",
            Self::ExecutorError => "EXECUTOR_ERROR",
            Self::PolicyViolation => "POLICY_VIOLATION",
            Self::PinsInsufficient => "PINS_INSUFFICIENT",
            Self::ConstitutionViolation => "CONSTITUTION_VIOLATION",
            Self::DuplicateDispatch => "DUPLICATE_DISPATCH",
            Self::InvalidTransition => "INVALID_TRANSITION",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_never_retryable() {
        assert!(!BreachCode::ScopeConflict.is_retryable());
        assert_eq!(BreachCode::ScopeConflict.class(), BreachClass::Scope);
    }

    #[test]
    fn test_quality_retryable_and_consumes_attempt() {
        assert!(BreachCode::CiFailed.is_retryable());
        assert!(BreachCode::CiFailed.consumes_attempt());
        assert!(!BreachCode::ScopeConflict.consumes_attempt());
    }

    #[test]
    fn test_policy_not_retryable() {
        assert!(!BreachCode::PolicyViolation.is_retryable());
        assert!(!BreachCode::ConstitutionViolation.is_retryable());
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_string(&BreachCode::ScopeConflict).unwrap();
        assert_eq!(json, "\"SCOPE_CONFLICT\"");
        let back: BreachCode = serde_json::from_str("\"CI_FAILED\"").unwrap();
        assert_eq!(back, BreachCode::CiFailed);
    }

    #[test]
    fn test_display_matches_wire() {
        for code in [
            BreachCode::ScopeConflict,
            BreachCode::TimeoutExceeded,
            BreachCode::DuplicateDispatch,
        ] {
            let wire = serde_json::to_string(&code).unwrap();
            assert_eq!(wire.trim_matches('"'), code.to_string());
        }
    }
}
