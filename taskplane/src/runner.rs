//! Internal runner — bounded in-process execution pool
//!
//! Jobs with `runner == internal` bypass the circuit breaker but are
//! bounded by a fixed-size semaphore. The pool shells out to the executor
//! command configured for the job's executor name, enforces a wall-clock
//! timeout, and posts the completion through the same settle path external
//! workers use. The command receives job metadata in its environment and
//! prints its structured submission as JSON on stdout.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::orchestrator::Orchestrator;
use crate::queue::RunnerKind;

/// Poll interval per internal executor loop
const CLAIM_WAIT: Duration = Duration::from_secs(5);

/// The internal execution pool
pub struct InternalRunner {
    orchestrator: Arc<Orchestrator>,
    permits: Arc<Semaphore>,
    worker_id: String,
}

impl InternalRunner {
    /// Register the pool as a worker and spawn one claim loop per
    /// configured internal executor. Returns the spawned handles.
    pub fn spawn(orchestrator: Arc<Orchestrator>) -> Vec<tokio::task::JoinHandle<()>> {
        let settings = orchestrator.config().runner.clone();
        if settings.executors.is_empty() {
            return Vec::new();
        }

        let executors: Vec<String> = settings.executors.keys().cloned().collect();
        let worker = orchestrator
            .queue()
            .register_worker("internal-pool", executors.clone(), vec![]);
        let runner = Arc::new(Self {
            orchestrator,
            permits: Arc::new(Semaphore::new(settings.internal_pool.max(1))),
            worker_id: worker.id,
        });

        executors
            .into_iter()
            .map(|executor| {
                let runner = Arc::clone(&runner);
                let command = settings.executors[&executor].clone();
                let timeout = Duration::from_secs(settings.timeout_secs);
                tokio::spawn(async move {
                    runner.claim_loop(executor, command, timeout).await;
                })
            })
            .collect()
    }

    async fn claim_loop(&self, executor: String, command: String, timeout: Duration) {
        info!(executor = %executor, "Internal runner loop started");
        loop {
            let claimed = self
                .orchestrator
                .queue()
                .claim_kind(&self.worker_id, &executor, RunnerKind::Internal, CLAIM_WAIT)
                .await;

            let job = match claimed {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(e) => {
                    warn!(executor = %executor, "Internal claim failed: {}", e);
                    tokio::time::sleep(CLAIM_WAIT).await;
                    continue;
                }
            };

            // The permit bounds concurrent executions across all loops.
            let permit = Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .expect("runner semaphore closed");

            if let Err(e) = self.orchestrator.queue().start(&job.id, &self.worker_id) {
                warn!(job_id = %job.id, "Failed to mark job running: {}", e);
            }
            let (exit_code, stdout) = run_command(&command, &job.id, &job.task_id, timeout).await;
            drop(permit);

            let submission = serde_json::from_str::<serde_json::Value>(&stdout).ok();
            if let Err(e) = self.orchestrator.settle(
                &job.id,
                &self.worker_id,
                exit_code,
                submission.as_ref(),
                None,
            ) {
                warn!(job_id = %job.id, "Internal settle failed: {}", e);
            }
        }
    }
}

/// Run the executor command with job metadata in the environment.
/// Returns (exit_code, stdout); a timeout or spawn failure maps to a
/// nonzero exit so the settle path treats it as an executor error.
async fn run_command(command: &str, job_id: &str, task_id: &str, timeout: Duration) -> (i32, String) {
    let child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .env("TASKPLANE_JOB_ID", job_id)
        .env("TASKPLANE_TASK_ID", task_id)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => {
            let code = output.status.code().unwrap_or(-1);
            (code, String::from_utf8_lossy(&output.stdout).to_string())
        }
        Ok(Err(e)) => {
            warn!(job_id, "Executor command failed to start: {}", e);
            (-1, String::new())
        }
        Err(_) => {
            warn!(job_id, "Executor command timed out");
            (-1, String::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_command_captures_stdout_and_exit() {
        let (code, stdout) =
            run_command("echo '{\"ok\":true}'", "job-1", "task-1", Duration::from_secs(5)).await;
        assert_eq!(code, 0);
        assert!(stdout.contains("\"ok\":true"));
    }

    #[tokio::test]
    async fn test_run_command_nonzero_exit() {
        let (code, _) = run_command("exit 3", "job-1", "task-1", Duration::from_secs(5)).await;
        assert_eq!(code, 3);
    }

    #[tokio::test]
    async fn test_run_command_timeout_is_executor_error() {
        let (code, _) =
            run_command("sleep 5", "job-1", "task-1", Duration::from_millis(50)).await;
        assert_eq!(code, -1);
    }

    #[tokio::test]
    async fn test_env_carries_job_metadata() {
        let (code, stdout) = run_command(
            "printf '%s %s' \"$TASKPLANE_JOB_ID\" \"$TASKPLANE_TASK_ID\"",
            "job-42",
            "task-7",
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(code, 0);
        assert_eq!(stdout, "job-42 task-7");
    }
}
