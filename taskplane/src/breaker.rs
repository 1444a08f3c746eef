//! Circuit Breaker — per-executor health gate with durable JSON state
//!
//! Consecutive failures quarantine an executor pool; while quarantined at
//! most one job may be dispatched as a health probe. A successful probe
//! closes the circuit and resets the counter; a failed probe extends the
//! cooldown (capped). A breaker stuck open past its maximum duration emits
//! a human-notice event instead of looping forever.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::events::{OrchestrationEvent, SharedEventBus};
use crate::store::MemStore;

/// Version stamp checked when loading persisted state
pub const BREAKER_SCHEMA_VERSION: u32 = 1;

/// Error type for breaker persistence
#[derive(Debug, thiserror::Error)]
pub enum BreakerError {
    #[error("I/O error on breaker state {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid breaker state file {path}: {message}")]
    InvalidState { path: PathBuf, message: String },
}

/// Durable per-executor health state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub schema_version: u32,
    /// Epoch millis until which the pool is quarantined; 0 when closed
    pub quarantine_until: i64,
    pub quarantine_reason: String,
    pub consecutive_failures: u32,
}

impl CircuitBreakerState {
    pub fn closed() -> Self {
        Self {
            schema_version: BREAKER_SCHEMA_VERSION,
            quarantine_until: 0,
            quarantine_reason: String::new(),
            consecutive_failures: 0,
        }
    }
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self::closed()
    }
}

/// Whether the pool is quarantined at `now_ms`
pub fn quarantine_active(state: &CircuitBreakerState, now_ms: i64) -> bool {
    now_ms < state.quarantine_until
}

/// Claim eligibility for an executor pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchGate {
    /// Healthy: dispatch normally
    Allow,
    /// Quarantined, probe slot free: dispatch exactly this one job
    Probe,
    /// Quarantined, probe already in flight: no dispatch
    Deny,
}

/// Breaker tuning knobs
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Initial quarantine duration in millis
    pub cooldown_ms: i64,
    /// Cap on the extended cooldown after repeated probe failures
    pub max_cooldown_ms: i64,
    /// Open duration past which the breaker raises a human notice
    pub max_open_ms: i64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_ms: 120_000,
            max_cooldown_ms: 960_000,
            max_open_ms: 1_800_000,
        }
    }
}

/// In-memory entry wrapping the durable state with runtime-only fields
#[derive(Debug, Clone, Default)]
struct BreakerEntry {
    state: CircuitBreakerState,
    /// Probe slot; intentionally not persisted — a restart may issue one
    /// fresh probe while quarantine itself stays durable
    probe_inflight: bool,
    /// When the circuit opened, for stuck-open detection
    opened_at_ms: Option<i64>,
    stuck_notice_sent: bool,
}

/// Durable health gate for all executor pools
pub struct CircuitBreakerStore {
    entries: MemStore<BreakerEntry>,
    config: BreakerConfig,
    /// State directory; None disables persistence (tests)
    dir: Option<PathBuf>,
    bus: SharedEventBus,
}

impl CircuitBreakerStore {
    pub fn new(config: BreakerConfig, dir: Option<PathBuf>, bus: SharedEventBus) -> Self {
        Self {
            entries: MemStore::new(),
            config,
            dir,
            bus,
        }
    }

    /// Load persisted breaker state files from the state directory
    pub fn load(&self) -> Result<usize, BreakerError> {
        let Some(dir) = &self.dir else {
            return Ok(0);
        };
        if !dir.exists() {
            return Ok(0);
        }

        let mut loaded = 0;
        let read_dir = std::fs::read_dir(dir).map_err(|source| BreakerError::Io {
            path: dir.clone(),
            source,
        })?;
        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(executor) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let state = load_state_file(&path)?;
            self.entries.put(
                executor,
                BreakerEntry {
                    opened_at_ms: (state.quarantine_until > 0)
                        .then(|| Utc::now().timestamp_millis()),
                    state,
                    ..Default::default()
                },
            );
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Current durable state for an executor (closed if never seen)
    pub fn state(&self, executor: &str) -> CircuitBreakerState {
        self.entries
            .get(executor)
            .map(|e| e.state)
            .unwrap_or_default()
    }

    /// Claim eligibility now
    pub fn gate(&self, executor: &str) -> DispatchGate {
        self.gate_at(executor, Utc::now().timestamp_millis())
    }

    /// Claim eligibility at `now_ms`. Reserving the probe slot is atomic
    /// with the check, so concurrent claimers get at most one `Probe`.
    pub fn gate_at(&self, executor: &str, now_ms: i64) -> DispatchGate {
        self.ensure(executor);
        self.entries
            .update(executor, |entry| {
                if !quarantine_active(&entry.state, now_ms) {
                    return DispatchGate::Allow;
                }
                if entry.probe_inflight {
                    DispatchGate::Deny
                } else {
                    entry.probe_inflight = true;
                    DispatchGate::Probe
                }
            })
            .unwrap_or(DispatchGate::Allow)
    }

    /// Release a probe slot reserved by `gate` when the claim lost its race
    pub fn release_probe(&self, executor: &str) {
        self.entries
            .update(executor, |entry| entry.probe_inflight = false);
    }

    /// Record a failed external job for the pool
    pub fn record_failure(&self, executor: &str) -> CircuitBreakerState {
        self.record_failure_at(executor, Utc::now().timestamp_millis())
    }

    pub fn record_failure_at(&self, executor: &str, now_ms: i64) -> CircuitBreakerState {
        self.ensure(executor);
        let (state, opened, stuck_open_for) = self
            .entries
            .update(executor, |entry| {
                entry.state.consecutive_failures += 1;
                entry.probe_inflight = false;

                let was_quarantined = quarantine_active(&entry.state, now_ms)
                    || entry.state.quarantine_until > 0 && entry.opened_at_ms.is_some();
                let mut opened = false;
                let mut stuck_open_for = None;

                if entry.state.consecutive_failures >= self.config.failure_threshold {
                    if !was_quarantined {
                        entry.state.quarantine_until = now_ms + self.config.cooldown_ms;
                        entry.state.quarantine_reason = format!(
                            "{} consecutive failures",
                            entry.state.consecutive_failures
                        );
                        entry.opened_at_ms = Some(now_ms);
                        entry.stuck_notice_sent = false;
                        opened = true;
                    } else {
                        // Probe failed: extend the cooldown, doubling per
                        // extra failure, capped.
                        let extra = entry
                            .state
                            .consecutive_failures
                            .saturating_sub(self.config.failure_threshold);
                        let cooldown = self
                            .config
                            .cooldown_ms
                            .saturating_mul(1_i64 << extra.min(8))
                            .min(self.config.max_cooldown_ms);
                        entry.state.quarantine_until = now_ms + cooldown;

                        if let Some(opened_at) = entry.opened_at_ms {
                            let open_for = now_ms - opened_at;
                            if open_for > self.config.max_open_ms && !entry.stuck_notice_sent {
                                entry.stuck_notice_sent = true;
                                stuck_open_for = Some(open_for);
                            }
                        }
                    }
                }

                (entry.state.clone(), opened, stuck_open_for)
            })
            .expect("entry ensured above");

        if opened {
            warn!(executor, quarantine_until = state.quarantine_until, "Circuit opened");
            self.bus.publish(OrchestrationEvent::BreakerOpened {
                executor: executor.to_string(),
                consecutive_failures: state.consecutive_failures,
                quarantine_until_ms: state.quarantine_until,
                timestamp: Utc::now(),
            });
        }
        if let Some(open_for_ms) = stuck_open_for {
            warn!(executor, open_for_ms, "Circuit stuck open; raising human notice");
            self.bus.publish(OrchestrationEvent::BreakerStuckOpen {
                executor: executor.to_string(),
                open_for_ms,
                timestamp: Utc::now(),
            });
        }

        self.persist(executor, &state);
        state
    }

    /// Record a successful external job; closes the circuit
    pub fn record_success(&self, executor: &str) -> CircuitBreakerState {
        self.ensure(executor);
        let (state, closed) = self
            .entries
            .update(executor, |entry| {
                let was_open = entry.state.quarantine_until > 0;
                entry.state = CircuitBreakerState::closed();
                entry.probe_inflight = false;
                entry.opened_at_ms = None;
                entry.stuck_notice_sent = false;
                (entry.state.clone(), was_open)
            })
            .expect("entry ensured above");

        if closed {
            info!(executor, "Circuit closed");
            self.bus.publish(OrchestrationEvent::BreakerClosed {
                executor: executor.to_string(),
                timestamp: Utc::now(),
            });
        }
        self.persist(executor, &state);
        state
    }

    pub fn executors(&self) -> Vec<String> {
        self.entries.keys()
    }

    fn ensure(&self, executor: &str) {
        self.entries.insert(executor, BreakerEntry::default());
    }

    fn persist(&self, executor: &str, state: &CircuitBreakerState) {
        let Some(dir) = &self.dir else { return };
        let path = dir.join(format!("{}.json", executor));
        if let Err(e) = save_state_file(&path, state) {
            warn!(executor, "Failed to persist breaker state: {}", e);
        }
    }
}

fn save_state_file(path: &Path, state: &CircuitBreakerState) -> Result<(), BreakerError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| BreakerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    }
    let json = serde_json::to_string_pretty(state).map_err(|e| BreakerError::InvalidState {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    std::fs::write(path, json).map_err(|source| BreakerError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn load_state_file(path: &Path) -> Result<CircuitBreakerState, BreakerError> {
    let json = std::fs::read_to_string(path).map_err(|source| BreakerError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let state: CircuitBreakerState =
        serde_json::from_str(&json).map_err(|e| BreakerError::InvalidState {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    if state.schema_version != BREAKER_SCHEMA_VERSION {
        return Err(BreakerError::InvalidState {
            path: path.to_path_buf(),
            message: format!(
                "schema_version {} != {}",
                state.schema_version, BREAKER_SCHEMA_VERSION
            ),
        });
    }
    Ok(state)
}
