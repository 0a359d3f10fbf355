use async_trait::async_trait;

use crate::error::BackendError;
use crate::jobs::model::JobRequest;

/// The system that actually runs a processing job.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Starts one run for `request` and returns the backend's run id.
    /// Submitting the same `(job_id, attempt)` twice must not start two runs.
    async fn submit_job(&self, request: &JobRequest) -> Result<String, BackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Queued,
    Running,
    Succeeded,
    Failed(String),
}

/// Where run outcomes come from when the backend does not push callbacks.
#[async_trait]
pub trait JobOutcomeSource: Send + Sync {
    /// Terminal states keep being returned until `forget` is called for the run.
    async fn poll(&self, backend_run_id: &str) -> Result<RunState, BackendError>;

    /// Called once the dispatcher has recorded a terminal state for the run.
    async fn forget(&self, _backend_run_id: &str) {}
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed(_))
    }
}
