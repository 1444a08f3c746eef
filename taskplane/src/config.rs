//! Configuration — TOML file plus environment-variable overrides
//!
//! Precedence: built-in defaults < TOML file < environment. CLI flags in
//! the binary override the loaded address/paths last.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|v| v.parse::<T>().ok())
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:7180".to_string(),
        }
    }
}

/// Queue settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub lease_secs: u64,
    pub max_requeues: u32,
    pub default_wait_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            lease_secs: 300,
            max_requeues: 3,
            default_wait_ms: 25_000,
        }
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    pub max_cooldown_secs: u64,
    pub max_open_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_secs: 120,
            max_cooldown_secs: 960,
            max_open_secs: 1800,
        }
    }
}

/// Escalation ladder settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EscalationSettings {
    pub repeat_threshold: u32,
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self {
            repeat_threshold: 2,
        }
    }
}

/// Board settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BoardSettings {
    pub default_wip_limit: usize,
    pub wip_limits: HashMap<String, usize>,
    /// Roles the prompt collaborator can render; empty accepts any
    pub known_roles: Vec<String>,
    pub default_max_attempts: u32,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            default_wip_limit: 4,
            wip_limits: HashMap::new(),
            known_roles: Vec::new(),
            default_max_attempts: 3,
        }
    }
}

/// Upgrade ladders consulted by Level-1/Level-2 escalations
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LadderSettings {
    /// Weakest to strongest
    pub models: Vec<String>,
    pub roles: Vec<String>,
}

impl Default for LadderSettings {
    fn default() -> Self {
        Self {
            models: vec![
                "haiku".to_string(),
                "sonnet".to_string(),
                "opus".to_string(),
            ],
            roles: vec![
                "coder".to_string(),
                "senior-coder".to_string(),
                "architect".to_string(),
            ],
        }
    }
}

/// Internal runner pool settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Fixed concurrency bound for internal jobs
    pub internal_pool: usize,
    /// executor name -> command to run
    pub executors: HashMap<String, String>,
    pub timeout_secs: u64,
    pub default_executor: String,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            internal_pool: 2,
            executors: HashMap::new(),
            timeout_secs: 600,
            default_executor: "claude-cli".to_string(),
        }
    }
}

/// Full control-plane configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSettings,
    /// Where breaker state, job snapshots, and the event log live
    pub state_dir: Option<PathBuf>,
    /// Repository root pins resolve against
    pub repo_root: Option<PathBuf>,
    pub queue: QueueSettings,
    pub breaker: BreakerSettings,
    pub escalation: EscalationSettings,
    pub board: BoardSettings,
    pub ladders: LadderSettings,
    pub runner: RunnerSettings,
}

impl Config {
    /// Load from an optional TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str(&text).map_err(|e| ConfigError::Parse {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?
            }
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("TASKPLANE_ADDR") {
            self.server.addr = addr;
        }
        if let Some(dir) = env_parse::<PathBuf>("TASKPLANE_STATE_DIR") {
            self.state_dir = Some(dir);
        }
        if let Some(root) = env_parse::<PathBuf>("TASKPLANE_REPO_ROOT") {
            self.repo_root = Some(root);
        }
        if let Some(secs) = env_parse::<u64>("TASKPLANE_LEASE_SECS") {
            self.queue.lease_secs = secs;
        }
        if let Some(n) = env_parse::<u32>("TASKPLANE_MAX_REQUEUES") {
            self.queue.max_requeues = n;
        }
        if let Some(n) = env_parse::<u32>("TASKPLANE_BREAKER_THRESHOLD") {
            self.breaker.failure_threshold = n;
        }
        if let Some(secs) = env_parse::<u64>("TASKPLANE_BREAKER_COOLDOWN_SECS") {
            self.breaker.cooldown_secs = secs;
        }
        if let Some(n) = env_parse::<u32>("TASKPLANE_REPEAT_THRESHOLD") {
            self.escalation.repeat_threshold = n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.addr, "127.0.0.1:7180");
        assert_eq!(config.queue.lease_secs, 300);
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.escalation.repeat_threshold, 2);
        assert_eq!(config.ladders.models.last().unwrap(), "opus");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/taskplane.toml"))).unwrap();
        assert_eq!(config.board.default_wip_limit, 4);
    }

    #[test]
    fn test_load_toml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskplane.toml");
        std::fs::write(
            &path,
            r#"
[server]
addr = "0.0.0.0:9999"

[queue]
lease_secs = 60

[board]
default_wip_limit = 2

[board.wip_limits]
docs = 1
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.server.addr, "0.0.0.0:9999");
        assert_eq!(config.queue.lease_secs, 60);
        assert_eq!(config.board.default_wip_limit, 2);
        assert_eq!(config.board.wip_limits.get("docs"), Some(&1));
        // Untouched sections keep their defaults
        assert_eq!(config.queue.max_requeues, 3);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskplane.toml");
        std::fs::write(&path, "not [valid").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }
}
