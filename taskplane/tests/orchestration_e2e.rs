//! End-to-end orchestration: the full ladder from CI failures through
//! model upgrade, role upgrade, and the human hold; parent splitting; and
//! lane WIP deferral.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use taskplane::board::task::Pins;
use taskplane::board::{TaskKind, TaskSpec, TaskStatus, TaskType};
use taskplane::events::EventBus;
use taskplane::orchestrator::{DispatchOutcome, Orchestrator};
use taskplane::queue::RunnerKind;
use taskplane::{Config, VerdictDecision};

fn repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("a.rs"), "pub fn a() {}\n").unwrap();
    std::fs::write(src.join("b.rs"), "pub fn b() {}\n").unwrap();
    dir
}

fn orchestrator_with(dir: &tempfile::TempDir, mutate: impl FnOnce(&mut Config)) -> Arc<Orchestrator> {
    let mut config = Config {
        repo_root: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    mutate(&mut config);
    Arc::new(Orchestrator::new(config, EventBus::new().shared()).unwrap())
}

fn spec(file: &str, lane: Option<&str>) -> TaskSpec {
    TaskSpec {
        title: "t".to_string(),
        goal: "make the module work".to_string(),
        role: "coder".to_string(),
        kind: Some(TaskKind::Atomic),
        task_type: TaskType::Fix,
        lane: lane.map(|l| l.to_string()),
        pins: Pins::new(vec![file.to_string()], vec![]),
        allowed_executors: vec![],
        allowed_models: vec![],
        files: vec![],
        max_attempts: None,
    }
}

fn failing_submission(task_id: &str, file: &str) -> serde_json::Value {
    json!({
        "task_id": task_id,
        "status": "DONE",
        "changed_files": [file],
        "tests": {"commands": ["cargo test"], "passed": false, "summary": "2 failed"},
        "artifacts": {"report": "r", "log": "l", "diff": "d", "submission": "s"},
        "exit_code": 0
    })
}

async fn claim(orch: &Orchestrator, worker_id: &str) -> taskplane::Job {
    orch.queue()
        .claim(worker_id, "claude-cli", Duration::ZERO)
        .await
        .unwrap()
        .expect("claimable job")
}

#[tokio::test]
async fn repeated_ci_failures_climb_the_full_ladder() {
    let dir = repo();
    let orch = orchestrator_with(&dir, |_| {});
    let worker = orch
        .queue()
        .register_worker("box-1", vec!["claude-cli".to_string()], vec![]);

    let (_, task_id, _) = orch
        .create_and_dispatch(spec("src/a.rs", None), None, None, RunnerKind::External)
        .unwrap();

    // Failure 1: plain Level0 retry on the same model
    let job = claim(&orch, &worker.id).await;
    assert_eq!(job.model, "haiku");
    orch.settle(&job.id, &worker.id, 0, Some(&failing_submission(&task_id, "src/a.rs")), None)
        .unwrap();
    assert_eq!(orch.board().get(&task_id).unwrap().escalation_level, 0);

    // Failure 2: repeat threshold hit -> Level1 model upgrade
    let job = claim(&orch, &worker.id).await;
    orch.settle(&job.id, &worker.id, 0, Some(&failing_submission(&task_id, "src/a.rs")), None)
        .unwrap();
    let task = orch.board().get(&task_id).unwrap();
    assert_eq!(task.escalation_level, 1);
    assert!(task.allowed_models.contains(&"sonnet".to_string()));

    // Failure 3: still failing -> Level2 role upgrade
    let job = claim(&orch, &worker.id).await;
    assert_eq!(job.model, "sonnet");
    orch.settle(&job.id, &worker.id, 0, Some(&failing_submission(&task_id, "src/a.rs")), None)
        .unwrap();
    let task = orch.board().get(&task_id).unwrap();
    assert_eq!(task.escalation_level, 2);
    assert_eq!(task.role, "senior-coder");

    // Failure 4: ladder tops out at the human hold
    let job = claim(&orch, &worker.id).await;
    orch.settle(&job.id, &worker.id, 0, Some(&failing_submission(&task_id, "src/a.rs")), None)
        .unwrap();
    let task = orch.board().get(&task_id).unwrap();
    assert_eq!(task.escalation_level, 3);
    assert_eq!(task.status, TaskStatus::Blocked);

    // No level was skipped and none regressed
    let history = orch.escalation().get(&task_id).unwrap();
    let levels: Vec<u8> = history.history.iter().map(|s| s.to_level.as_u8()).collect();
    assert_eq!(levels, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn parent_split_then_child_dispatch() {
    let dir = repo();
    let orch = orchestrator_with(&dir, |_| {});

    let parent_spec = TaskSpec {
        kind: Some(TaskKind::Parent),
        pins: Pins::default(),
        ..spec("unused", None)
    };
    let (status, parent_id, outcome) = orch
        .create_and_dispatch(parent_spec, None, None, RunnerKind::External)
        .unwrap();
    assert_eq!(status, TaskStatus::Backlog);
    assert!(outcome.is_none(), "parents are never dispatched directly");

    let children = orch
        .board()
        .split(
            &parent_id,
            vec![spec("src/a.rs", None), spec("src/b.rs", None)],
        )
        .unwrap();
    assert_eq!(children.len(), 2);

    let child = &children[0];
    let outcome = orch
        .dispatch(&child.id, None, None, RunnerKind::External)
        .unwrap();
    assert!(matches!(outcome, DispatchOutcome::Dispatched { .. }));
    assert_eq!(
        orch.board().get(&child.id).unwrap().status,
        TaskStatus::InProgress
    );
}

#[tokio::test]
async fn lane_wip_cap_defers_dispatch() {
    let dir = repo();
    let orch = orchestrator_with(&dir, |config| {
        config.board.wip_limits.insert("narrow".to_string(), 1);
    });

    let (_, _first, outcome) = orch
        .create_and_dispatch(spec("src/a.rs", Some("narrow")), None, None, RunnerKind::External)
        .unwrap();
    assert!(matches!(outcome, Some(DispatchOutcome::Dispatched { .. })));

    // Second task in the lane defers instead of dispatching or erroring
    let (status, second, outcome) = orch
        .create_and_dispatch(spec("src/b.rs", Some("narrow")), None, None, RunnerKind::External)
        .unwrap();
    assert!(matches!(outcome, Some(DispatchOutcome::Deferred { .. })));
    assert_eq!(status, TaskStatus::Ready);
    assert!(orch.queue().job_for_task(&second).is_none(), "no job was created");
}

#[tokio::test]
async fn scope_breach_never_becomes_done() {
    let dir = repo();
    let orch = orchestrator_with(&dir, |_| {});
    let worker = orch
        .queue()
        .register_worker("box-1", vec!["claude-cli".to_string()], vec![]);

    let (_, task_id, _) = orch
        .create_and_dispatch(spec("src/a.rs", None), None, None, RunnerKind::External)
        .unwrap();
    let job = claim(&orch, &worker.id).await;

    // Passing tests, complete artifacts, but one file out of scope
    let body = json!({
        "task_id": task_id,
        "status": "DONE",
        "changed_files": ["src/a.rs"],
        "new_files": ["src/sneaky.rs"],
        "tests": {"commands": ["cargo test"], "passed": true, "summary": "all green"},
        "artifacts": {"report": "r", "log": "l", "diff": "d", "submission": "s"},
        "exit_code": 0
    });
    let outcome = orch.settle(&job.id, &worker.id, 0, Some(&body), None).unwrap();

    let verdict = outcome.verdict.unwrap();
    assert_eq!(verdict.verdict, VerdictDecision::Reject);
    assert!(!verdict.checks.scope_clean);
    assert_eq!(outcome.task_status, TaskStatus::Failed);

    // Rejects are never auto-repaired: no fresh job was queued
    let latest = orch.queue().job_for_task(&task_id).unwrap();
    assert_eq!(latest.id, job.id);
}
