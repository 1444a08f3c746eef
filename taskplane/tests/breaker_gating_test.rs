//! Circuit breaker integration: quarantine gates claims, a single probe
//! is allowed through, and the probe outcome opens or closes the circuit.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use taskplane::board::task::Pins;
use taskplane::board::{TaskKind, TaskSpec, TaskType};
use taskplane::events::EventBus;
use taskplane::orchestrator::{DispatchOutcome, Orchestrator};
use taskplane::queue::RunnerKind;
use taskplane::Config;

fn repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("a.rs"), "pub fn a() {}\n").unwrap();
    std::fs::write(src.join("b.rs"), "pub fn b() {}\n").unwrap();
    dir
}

fn orchestrator(dir: &tempfile::TempDir) -> Arc<Orchestrator> {
    let config = Config {
        repo_root: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    Arc::new(Orchestrator::new(config, EventBus::new().shared()).unwrap())
}

fn spec(file: &str) -> TaskSpec {
    TaskSpec {
        title: "t".to_string(),
        goal: "repair the module".to_string(),
        role: "coder".to_string(),
        kind: Some(TaskKind::Atomic),
        task_type: TaskType::Fix,
        lane: None,
        pins: Pins::new(vec![file.to_string()], vec![]),
        allowed_executors: vec![],
        allowed_models: vec![],
        files: vec![],
        max_attempts: None,
    }
}

fn good_submission(task_id: &str, file: &str) -> serde_json::Value {
    json!({
        "task_id": task_id,
        "status": "DONE",
        "changed_files": [file],
        "tests": {"commands": ["cargo test"], "passed": true, "summary": "ok"},
        "artifacts": {"report": "r", "log": "l", "diff": "d", "submission": "s"},
        "exit_code": 0
    })
}

#[tokio::test]
async fn quarantine_allows_exactly_one_probe() {
    let dir = repo();
    let orch = orchestrator(&dir);
    let worker = orch
        .queue()
        .register_worker("box-1", vec!["claude-cli".to_string()], vec![]);

    orch.create_and_dispatch(spec("src/a.rs"), None, None, RunnerKind::External)
        .unwrap();
    orch.create_and_dispatch(spec("src/b.rs"), None, None, RunnerKind::External)
        .unwrap();

    // Trip the breaker for the pool
    for _ in 0..3 {
        orch.breaker().record_failure("claude-cli");
    }

    // One probe gets through; the rest of the pool is gated
    let probe = orch
        .queue()
        .claim(&worker.id, "claude-cli", Duration::ZERO)
        .await
        .unwrap()
        .expect("probe claim");
    assert!(probe.probe);

    let denied = orch
        .queue()
        .claim(&worker.id, "claude-cli", Duration::ZERO)
        .await
        .unwrap();
    assert!(denied.is_none(), "second claim must be gated");
}

#[tokio::test]
async fn probe_success_closes_circuit_and_resets_counter() {
    let dir = repo();
    let orch = orchestrator(&dir);
    let worker = orch
        .queue()
        .register_worker("box-1", vec!["claude-cli".to_string()], vec![]);

    let (_, task_a, _) = orch
        .create_and_dispatch(spec("src/a.rs"), None, None, RunnerKind::External)
        .unwrap();
    orch.create_and_dispatch(spec("src/b.rs"), None, None, RunnerKind::External)
        .unwrap();

    for _ in 0..3 {
        orch.breaker().record_failure("claude-cli");
    }

    let probe = orch
        .queue()
        .claim(&worker.id, "claude-cli", Duration::ZERO)
        .await
        .unwrap()
        .expect("probe claim");
    assert_eq!(probe.task_id, task_a);

    // Successful probe completion closes the circuit
    orch.settle(
        &probe.id,
        &worker.id,
        0,
        Some(&good_submission(&task_a, "src/a.rs")),
        None,
    )
    .unwrap();

    let state = orch.breaker().state("claude-cli");
    assert_eq!(state.consecutive_failures, 0);
    assert_eq!(state.quarantine_until, 0);

    // The pool is open again: the second job claims normally
    let next = orch
        .queue()
        .claim(&worker.id, "claude-cli", Duration::ZERO)
        .await
        .unwrap()
        .expect("pool reopened");
    assert!(!next.probe);
}

#[tokio::test]
async fn probe_failure_keeps_pool_quarantined() {
    let dir = repo();
    let orch = orchestrator(&dir);
    let worker = orch
        .queue()
        .register_worker("box-1", vec!["claude-cli".to_string()], vec![]);

    orch.create_and_dispatch(spec("src/a.rs"), None, None, RunnerKind::External)
        .unwrap();
    orch.create_and_dispatch(spec("src/b.rs"), None, None, RunnerKind::External)
        .unwrap();

    for _ in 0..3 {
        orch.breaker().record_failure("claude-cli");
    }
    let before = orch.breaker().state("claude-cli");

    let probe = orch
        .queue()
        .claim(&worker.id, "claude-cli", Duration::ZERO)
        .await
        .unwrap()
        .expect("probe claim");

    // Executor crashes during the probe: cooldown extends
    orch.settle(&probe.id, &worker.id, 9, None, None).unwrap();

    let after = orch.breaker().state("claude-cli");
    assert!(after.quarantine_until >= before.quarantine_until);
    assert!(after.consecutive_failures > before.consecutive_failures);
}

#[tokio::test]
async fn internal_jobs_bypass_the_breaker() {
    let dir = repo();
    let mut config = Config {
        repo_root: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    config
        .runner
        .executors
        .insert("cargo-check".to_string(), "true".to_string());
    let orch = Arc::new(Orchestrator::new(config, EventBus::new().shared()).unwrap());

    let worker = orch
        .queue()
        .register_worker("pool", vec!["cargo-check".to_string()], vec![]);

    let (_, _, outcome) = orch
        .create_and_dispatch(
            spec("src/a.rs"),
            Some("cargo-check"),
            None,
            RunnerKind::Internal,
        )
        .unwrap();
    assert!(matches!(outcome, Some(DispatchOutcome::Dispatched { .. })));

    // Quarantine the pool name; internal claims must still pass
    for _ in 0..3 {
        orch.breaker().record_failure("cargo-check");
    }

    let claimed = orch
        .queue()
        .claim_kind(&worker.id, "cargo-check", RunnerKind::Internal, Duration::ZERO)
        .await
        .unwrap();
    assert!(claimed.is_some(), "internal jobs are not breaker-gated");
}
