//! The pure escalation decision function

use serde::{Deserialize, Serialize};

use crate::breach::BreachCode;

/// The five increasing-authority responses to failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    /// Retry as-is
    Level0,
    /// Retry with a stronger model
    Level1,
    /// Retry with an upgraded role
    Level2,
    /// Stop and wait for a human
    Level3,
    /// Abort to the dead-letter queue
    Level4,
}

impl EscalationLevel {
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Level0 => 0,
            Self::Level1 => 1,
            Self::Level2 => 2,
            Self::Level3 => 3,
            Self::Level4 => 4,
        }
    }

    /// What the orchestrator does at this level
    pub fn action(&self) -> &'static str {
        match self {
            Self::Level0 => "retry",
            Self::Level1 => "model_upgrade",
            Self::Level2 => "role_upgrade",
            Self::Level3 => "human",
            Self::Level4 => "abort",
        }
    }

    /// One step up the ladder. Level3 holds until a human resolves;
    /// Level4 is terminal.
    pub fn bump(&self) -> Self {
        match self {
            Self::Level0 => Self::Level1,
            Self::Level1 => Self::Level2,
            Self::Level2 => Self::Level3,
            Self::Level3 => Self::Level3,
            Self::Level4 => Self::Level4,
        }
    }
}

impl std::fmt::Display for EscalationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "level{}", self.as_u8())
    }
}

/// Counters feeding one decision
#[derive(Debug, Clone, Copy)]
pub struct BreachCounters {
    /// Quality attempts consumed so far (before this failure)
    pub attempt: u32,
    pub max_attempts: u32,
    /// Consecutive occurrences of the same breach code, this one included
    pub repeat_count: u32,
}

/// Configuration for the escalation ladder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Consecutive identical breach codes before climbing one level
    pub repeat_threshold: u32,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            repeat_threshold: 2,
        }
    }
}

/// The decision function. Pure: same inputs, same level, no I/O.
///
/// Fast-track rules bypass the ladder entirely; otherwise the task stays
/// at its current level while the attempt budget holds and the breach
/// signature keeps changing, and climbs exactly one level on a repeat or
/// on budget exhaustion. The result never sits below `current` — levels
/// are monotonic within one task lifetime.
pub fn next_level(
    current: EscalationLevel,
    breach: BreachCode,
    counters: BreachCounters,
    config: &EscalationConfig,
) -> EscalationLevel {
    // Fast-track: these never route to a retry, whatever the counters say.
    let fast_track = match breach {
        BreachCode::PolicyViolation | BreachCode::PinsInsufficient => Some(EscalationLevel::Level3),
        BreachCode::BudgetExceeded | BreachCode::ConstitutionViolation => {
            Some(EscalationLevel::Level4)
        }
        _ => None,
    };
    if let Some(level) = fast_track {
        return level.max(current);
    }

    let repeated = counters.repeat_count >= config.repeat_threshold;
    let exhausted = counters.attempt >= counters.max_attempts;

    if repeated || exhausted {
        current.bump()
    } else {
        current
    }
}

/// Engine wrapper carrying the config
pub struct EscalationEngine {
    config: EscalationConfig,
}

impl EscalationEngine {
    pub fn new() -> Self {
        Self {
            config: EscalationConfig::default(),
        }
    }

    pub fn with_config(config: EscalationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    /// Decide from a fresh task (current level 0); see `next_level`
    pub fn next_action(
        &self,
        breach: BreachCode,
        attempt: u32,
        max_attempts: u32,
        repeat_count: u32,
    ) -> EscalationLevel {
        next_level(
            EscalationLevel::Level0,
            breach,
            BreachCounters {
                attempt,
                max_attempts,
                repeat_count,
            },
            &self.config,
        )
    }

    pub fn decide(
        &self,
        current: EscalationLevel,
        breach: BreachCode,
        counters: BreachCounters,
    ) -> EscalationLevel {
        next_level(current, breach, counters, &self.config)
    }
}

impl Default for EscalationEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(attempt: u32, max: u32, repeat: u32) -> BreachCounters {
        BreachCounters {
            attempt,
            max_attempts: max,
            repeat_count: repeat,
        }
    }

    #[test]
    fn test_retry_while_budget_holds() {
        let engine = EscalationEngine::new();
        let level = engine.next_action(BreachCode::CiFailed, 1, 5, 1);
        assert_eq!(level, EscalationLevel::Level0);
    }

    #[test]
    fn test_policy_violation_fast_tracks_to_human() {
        // Attempt 1 of 5 must still route straight to Level3
        let engine = EscalationEngine::new();
        let level = engine.next_action(BreachCode::PolicyViolation, 1, 5, 1);
        assert_eq!(level, EscalationLevel::Level3);
    }

    #[test]
    fn test_budget_and_constitution_abort() {
        let engine = EscalationEngine::new();
        assert_eq!(
            engine.next_action(BreachCode::BudgetExceeded, 1, 5, 1),
            EscalationLevel::Level4
        );
        assert_eq!(
            engine.next_action(BreachCode::ConstitutionViolation, 1, 5, 1),
            EscalationLevel::Level4
        );
    }

    #[test]
    fn test_pins_insufficient_goes_to_human() {
        // The system, not the agent, must supply more scope
        let engine = EscalationEngine::new();
        assert_eq!(
            engine.next_action(BreachCode::PinsInsufficient, 1, 5, 1),
            EscalationLevel::Level3
        );
    }

    #[test]
    fn test_repeat_climbs_exactly_one_level() {
        let config = EscalationConfig::default();
        let c = counters(1, 5, 2);

        let l1 = next_level(EscalationLevel::Level0, BreachCode::CiFailed, c, &config);
        assert_eq!(l1, EscalationLevel::Level1);

        let l2 = next_level(l1, BreachCode::CiFailed, c, &config);
        assert_eq!(l2, EscalationLevel::Level2);

        let l3 = next_level(l2, BreachCode::CiFailed, c, &config);
        assert_eq!(l3, EscalationLevel::Level3);

        // Level3 holds for a human; no silent climb to abort
        let held = next_level(l3, BreachCode::CiFailed, c, &config);
        assert_eq!(held, EscalationLevel::Level3);
    }

    #[test]
    fn test_exhausted_attempts_climb() {
        let config = EscalationConfig::default();
        let level = next_level(
            EscalationLevel::Level0,
            BreachCode::CiFailed,
            counters(5, 5, 1),
            &config,
        );
        assert_eq!(level, EscalationLevel::Level1);
    }

    #[test]
    fn test_fast_track_is_monotonic() {
        // A task already at Level4 never drops to Level3
        let config = EscalationConfig::default();
        let level = next_level(
            EscalationLevel::Level4,
            BreachCode::PolicyViolation,
            counters(1, 5, 1),
            &config,
        );
        assert_eq!(level, EscalationLevel::Level4);
    }

    #[test]
    fn test_decision_is_pure() {
        let config = EscalationConfig::default();
        let c = counters(2, 5, 2);
        let a = next_level(EscalationLevel::Level1, BreachCode::CiFailed, c, &config);
        let b = next_level(EscalationLevel::Level1, BreachCode::CiFailed, c, &config);
        assert_eq!(a, b);
    }

    #[test]
    fn test_configurable_repeat_threshold() {
        let engine = EscalationEngine::with_config(EscalationConfig { repeat_threshold: 3 });
        assert_eq!(
            engine.next_action(BreachCode::CiFailed, 1, 5, 2),
            EscalationLevel::Level0
        );
        assert_eq!(
            engine.next_action(BreachCode::CiFailed, 1, 5, 3),
            EscalationLevel::Level1
        );
    }
}
