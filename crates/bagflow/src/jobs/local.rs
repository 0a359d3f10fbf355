use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::BackendError;
use crate::jobs::backend::{ExecutionBackend, JobOutcomeSource, RunState};
use crate::jobs::model::JobRequest;

struct TrackedRun {
    state: RunState,
    finished_at: Option<Instant>,
}

type Runs = Arc<Mutex<HashMap<String, TrackedRun>>>;

/// Runs the processor as a child process of the trigger. Meant for development
/// and single-host installs; run states live in memory only.
///
/// Finished runs are kept until the dispatcher forgets them, or until
/// `retention` has passed for runs nobody polls.
pub struct LocalProcessBackend {
    program: String,
    retention: Duration,
    runs: Runs,
}

impl LocalProcessBackend {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            retention: Duration::from_secs(60 * 60),
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn tracked_runs(&self) -> usize {
        self.runs.lock().len()
    }

    fn prune(&self) {
        let mut runs = self.runs.lock();
        let before = runs.len();
        runs.retain(|_, run| {
            run.finished_at
                .map_or(true, |at| at.elapsed() <= self.retention)
        });
        if runs.len() < before {
            debug!(dropped = before - runs.len(), "expired finished local runs");
        }
    }
}

#[async_trait]
impl ExecutionBackend for LocalProcessBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn submit_job(&self, request: &JobRequest) -> Result<String, BackendError> {
        let child = Command::new(&self.program)
            .arg(&request.source_bucket)
            .arg(&request.source_key)
            .arg(&request.dest_bucket)
            .arg(&request.dest_key)
            .env("BAGFLOW_JOB_ID", &request.job_id)
            .env("BAGFLOW_ATTEMPT", request.attempt.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BackendError::Transport(format!("spawn {}: {e}", self.program)))?;

        self.prune();
        let run_id = Uuid::new_v4().to_string();
        self.runs.lock().insert(
            run_id.clone(),
            TrackedRun {
                state: RunState::Running,
                finished_at: None,
            },
        );

        let runs = self.runs.clone();
        let id = run_id.clone();
        let job_id = request.job_id.clone();
        tokio::spawn(async move {
            let state = match child.wait_with_output().await {
                Ok(out) if out.status.success() => RunState::Succeeded,
                Ok(out) => {
                    let stderr = String::from_utf8_lossy(&out.stderr);
                    let last = stderr.lines().last().unwrap_or("").trim().to_string();
                    RunState::Failed(format!("processor exited with {}: {last}", out.status))
                }
                Err(e) => RunState::Failed(format!("waiting for processor: {e}")),
            };

            match &state {
                RunState::Succeeded => info!(job_id = %job_id, run_id = %id, "local run finished"),
                other => warn!(job_id = %job_id, run_id = %id, state = ?other, "local run failed"),
            }
            runs.lock().insert(
                id,
                TrackedRun {
                    state,
                    finished_at: Some(Instant::now()),
                },
            );
        });

        Ok(run_id)
    }
}

#[async_trait]
impl JobOutcomeSource for LocalProcessBackend {
    async fn poll(&self, backend_run_id: &str) -> Result<RunState, BackendError> {
        self.prune();
        self.runs
            .lock()
            .get(backend_run_id)
            .map(|run| run.state.clone())
            .ok_or_else(|| BackendError::Protocol(format!("unknown run {backend_run_id}")))
    }

    async fn forget(&self, backend_run_id: &str) {
        self.runs.lock().remove(backend_run_id);
    }
}
