use chrono::Utc;
use parking_lot::Mutex;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{DispatchError, TableError};
use crate::jobs::backend::{ExecutionBackend, JobOutcomeSource, RunState};
use crate::jobs::error_codes::ErrorCode;
use crate::jobs::locks::KeyLocks;
use crate::jobs::model::{JobRecord, JobRequest, JobStatus};
use crate::jobs::retry::{next_delay, RetryConfig};
use crate::jobs::table::JobTable;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_attempts: u32,
    pub retry: RetryConfig,
    /// In-flight records untouched for longer than this are failed by the sweep.
    pub running_timeout: Duration,
    /// How long terminal records are kept for duplicate suppression.
    pub dedup_window: Duration,
    pub max_concurrent_submits: usize,
    /// Upper bound on records examined per maintenance step.
    pub scan_batch: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry: RetryConfig::default(),
            running_timeout: Duration::from_secs(60 * 60),
            dedup_window: Duration::from_secs(24 * 60 * 60),
            max_concurrent_submits: 3,
            scan_batch: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Accepted { attempt: u32 },
    Deduplicated { status: JobStatus },
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportAck {
    Applied,
    /// Duplicate or out-of-date report; nothing changed.
    Stale,
    Unknown,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub timed_out: usize,
    pub retried: usize,
    pub polled: usize,
    pub evicted: usize,
}

struct PendingRetry {
    attempt: u32,
    token: CancellationToken,
}

struct Inner {
    table: Arc<dyn JobTable>,
    backend: Arc<dyn ExecutionBackend>,
    outcomes: Option<Arc<dyn JobOutcomeSource>>,
    locks: KeyLocks,
    cfg: DispatcherConfig,
    submit_permits: Semaphore,
    retries: Mutex<HashMap<String, PendingRetry>>,
    shutdown: CancellationToken,
}

/// Owns the job table and every interaction with the execution backend.
///
/// All writes for one `job_id` happen under that id's key lock, and every
/// write is a compare-and-swap against the version that was read.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(
        table: Arc<dyn JobTable>,
        backend: Arc<dyn ExecutionBackend>,
        outcomes: Option<Arc<dyn JobOutcomeSource>>,
        cfg: DispatcherConfig,
    ) -> Self {
        let permits = cfg.max_concurrent_submits.max(1);
        Self {
            inner: Arc::new(Inner {
                table,
                backend,
                outcomes,
                locks: KeyLocks::new(),
                cfg,
                submit_permits: Semaphore::new(permits),
                retries: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn table(&self) -> &Arc<dyn JobTable> {
        &self.inner.table
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.cfg
    }

    /// Cancels every pending retry timer. Records keep their `next_retry_at`,
    /// so the next process picks them up through `recover_retries`.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn pending_retries(&self) -> usize {
        self.inner.retries.lock().len()
    }

    // ----------------------------
    // Submission
    // ----------------------------

    #[instrument(skip(self, request), fields(job_id = %request.job_id))]
    pub async fn submit(&self, request: JobRequest) -> Result<SubmitOutcome, DispatchError> {
        let _guard = self.inner.locks.lock(&request.job_id).await;

        match self.inner.table.get(&request.job_id).await? {
            None => {
                let record = JobRecord::pending(&request, self.inner.cfg.max_attempts, Utc::now());
                if !self.inner.table.put_if_absent(&record).await? {
                    // another dispatcher sharing the table got there first
                    let status = self
                        .inner
                        .table
                        .get(&request.job_id)
                        .await?
                        .map(|r| r.status)
                        .unwrap_or(JobStatus::Pending);
                    return Ok(SubmitOutcome::Deduplicated { status });
                }

                info!(
                    bucket = %request.source_bucket,
                    key = %request.source_key,
                    "new job"
                );
                Ok(self.dispatch_locked(record, false).await?)
            }
            Some(record) => self.resubmit_or_dedup_locked(record).await,
        }
    }

    async fn resubmit_or_dedup_locked(
        &self,
        record: JobRecord,
    ) -> Result<SubmitOutcome, DispatchError> {
        match record.status {
            JobStatus::Pending
            | JobStatus::Submitted
            | JobStatus::Running
            | JobStatus::Succeeded => {
                debug!(status = %record.status, "duplicate notification suppressed");
                Ok(SubmitOutcome::Deduplicated {
                    status: record.status,
                })
            }
            JobStatus::Failed if !record.attempts_exhausted() => {
                self.cancel_retry(&record.job_id);
                info!(attempt = record.attempt + 1, "resubmitting failed job early");
                Ok(self.dispatch_locked(record, true).await?)
            }
            JobStatus::Failed => Ok(SubmitOutcome::Rejected {
                reason: format!(
                    "attempts exhausted ({}/{})",
                    record.attempt, record.max_attempts
                ),
            }),
            JobStatus::Abandoned => Ok(SubmitOutcome::Rejected {
                reason: record
                    .last_error
                    .unwrap_or_else(|| "job abandoned".to_string()),
            }),
        }
    }

    /// Moves the record to `Submitted` and calls the backend. Caller holds the key lock.
    async fn dispatch_locked(
        &self,
        record: JobRecord,
        next_attempt: bool,
    ) -> Result<SubmitOutcome, TableError> {
        let Some(submitted) = self
            .transition(&record, |r| {
                if next_attempt {
                    r.attempt += 1;
                }
                r.status = JobStatus::Submitted;
                r.backend_run_id = None;
                r.next_retry_at = None;
            })
            .await?
        else {
            return Ok(SubmitOutcome::Deduplicated {
                status: record.status,
            });
        };

        let attempt = submitted.attempt;
        let request = submitted.request();
        let result = {
            let _permit = self.inner.submit_permits.acquire().await.ok();
            self.inner.backend.submit_job(&request).await
        };

        match result {
            Ok(run_id) => {
                info!(
                    attempt,
                    run_id = %run_id,
                    backend = self.inner.backend.name(),
                    "job submitted"
                );
                self.transition(&submitted, |r| r.backend_run_id = Some(run_id))
                    .await?;
            }
            Err(e) => {
                warn!(attempt, error = %e, "backend submit failed");
                if let Some(reason) = self
                    .fail_locked(submitted, ErrorCode::SubmitTransport, &e.to_string())
                    .await?
                {
                    return Ok(SubmitOutcome::Rejected { reason });
                }
            }
        }

        Ok(SubmitOutcome::Accepted { attempt })
    }

    // ----------------------------
    // Outcomes
    // ----------------------------

    #[instrument(skip(self))]
    pub async fn mark_running(&self, job_id: &str, attempt: u32) -> Result<ReportAck, DispatchError> {
        let _guard = self.inner.locks.lock(job_id).await;

        let Some(record) = self.inner.table.get(job_id).await? else {
            return Ok(ReportAck::Unknown);
        };
        if record.attempt != attempt {
            return Ok(ReportAck::Stale);
        }

        match record.status {
            JobStatus::Running => Ok(ReportAck::Applied),
            JobStatus::Submitted => {
                let moved = self
                    .transition(&record, |r| r.status = JobStatus::Running)
                    .await?;
                Ok(if moved.is_some() {
                    ReportAck::Applied
                } else {
                    ReportAck::Stale
                })
            }
            _ => Ok(ReportAck::Stale),
        }
    }

    /// Idempotent per `(job_id, attempt)`: only the current attempt of an
    /// in-flight record is affected.
    #[instrument(skip(self, result))]
    pub async fn report_outcome(
        &self,
        job_id: &str,
        attempt: u32,
        result: JobResult,
    ) -> Result<ReportAck, DispatchError> {
        let _guard = self.inner.locks.lock(job_id).await;

        let Some(record) = self.inner.table.get(job_id).await? else {
            return Ok(ReportAck::Unknown);
        };
        if record.attempt != attempt
            || !matches!(record.status, JobStatus::Submitted | JobStatus::Running)
        {
            debug!(status = %record.status, current_attempt = record.attempt, "stale outcome ignored");
            return Ok(ReportAck::Stale);
        }

        match result {
            JobResult::Succeeded => {
                let done = self
                    .transition(&record, |r| {
                        r.status = JobStatus::Succeeded;
                        r.last_error = None;
                        r.next_retry_at = None;
                    })
                    .await?;
                if done.is_none() {
                    return Ok(ReportAck::Stale);
                }
                info!(attempt, "job succeeded");
            }
            JobResult::Failed(message) => {
                warn!(attempt, error = %message, "job run failed");
                self.fail_locked(record, ErrorCode::JobExecution, &message)
                    .await?;
            }
        }

        Ok(ReportAck::Applied)
    }

    pub async fn status(&self, job_id: &str) -> Result<Option<JobRecord>, DispatchError> {
        Ok(self.inner.table.get(job_id).await?)
    }

    /// Operator abandon. Terminal records are returned unchanged.
    #[instrument(skip(self))]
    pub async fn abandon(&self, job_id: &str) -> Result<Option<JobRecord>, DispatchError> {
        let _guard = self.inner.locks.lock(job_id).await;

        let Some(record) = self.inner.table.get(job_id).await? else {
            return Ok(None);
        };
        if record.status.is_terminal() {
            return Ok(Some(record));
        }

        self.cancel_retry(job_id);
        let message = match &record.last_error {
            Some(prev) => format!("abandoned by operator (last error: {prev})"),
            None => "abandoned by operator".to_string(),
        };

        match self
            .transition(&record, |r| {
                r.status = JobStatus::Abandoned;
                r.last_error = Some(ErrorCode::ManualAbandon.format(&message));
                r.next_retry_at = None;
            })
            .await?
        {
            Some(abandoned) => {
                warn!(attempt = abandoned.attempt, "job abandoned by operator");
                Ok(Some(abandoned))
            }
            None => Ok(self.inner.table.get(job_id).await?),
        }
    }

    // ----------------------------
    // Failure + retry
    // ----------------------------

    /// Records a failed attempt: schedules the next one, or abandons at the cap.
    /// Returns the abandoned record's `last_error` when the cap was hit.
    async fn fail_locked(
        &self,
        record: JobRecord,
        code: ErrorCode,
        message: &str,
    ) -> Result<Option<String>, TableError> {
        let error = code.format(message);

        if record.attempts_exhausted() {
            let abandoned = self
                .transition(&record, |r| {
                    r.status = JobStatus::Abandoned;
                    r.last_error = Some(ErrorCode::AttemptsExhausted.format(&error));
                    r.next_retry_at = None;
                })
                .await?;

            if let Some(abandoned) = abandoned {
                error!(
                    alert = true,
                    job_id = %abandoned.job_id,
                    bucket = %abandoned.source_bucket,
                    key = %abandoned.source_key,
                    attempts = abandoned.attempt,
                    last_error = %error,
                    "job abandoned after exhausting attempts; manual intervention required"
                );
                return Ok(abandoned.last_error);
            }
            return Ok(None);
        }

        let delay = self.retry_delay(record.attempt);
        let next_retry_at =
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

        let failed = self
            .transition(&record, |r| {
                r.status = JobStatus::Failed;
                r.last_error = Some(error.clone());
                r.next_retry_at = Some(next_retry_at);
            })
            .await?;

        if let Some(failed) = failed {
            info!(
                attempt = failed.attempt,
                delay_ms = delay.as_millis() as u64,
                "retry scheduled"
            );
            self.schedule_retry(&failed.job_id, failed.attempt, delay);
        }
        Ok(None)
    }

    fn retry_delay(&self, failed_attempt: u32) -> Duration {
        let mut rng = StdRng::from_entropy();
        next_delay(failed_attempt, &self.inner.cfg.retry, &mut rng)
    }

    fn schedule_retry(&self, job_id: &str, attempt: u32, delay: Duration) {
        let token = self.inner.shutdown.child_token();
        if let Some(prev) = self.inner.retries.lock().insert(
            job_id.to_string(),
            PendingRetry {
                attempt,
                token: token.clone(),
            },
        ) {
            prev.token.cancel();
        }

        let dispatcher = self.clone();
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(job_id = %job_id, attempt, "pending retry cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    dispatcher.clear_retry(&job_id, attempt);
                    if let Err(e) = dispatcher.retry(&job_id, attempt).await {
                        // next_retry_at is still set; recover_retries will pick it up
                        warn!(job_id = %job_id, attempt, error = %e, "retry failed to run");
                    }
                }
            }
        });
    }

    fn clear_retry(&self, job_id: &str, attempt: u32) {
        let mut retries = self.inner.retries.lock();
        if retries.get(job_id).is_some_and(|p| p.attempt == attempt) {
            retries.remove(job_id);
        }
    }

    fn cancel_retry(&self, job_id: &str) {
        if let Some(pending) = self.inner.retries.lock().remove(job_id) {
            pending.token.cancel();
        }
    }

    /// Resubmits a failed record if it is still at `expected_attempt`.
    pub async fn retry(&self, job_id: &str, expected_attempt: u32) -> Result<bool, DispatchError> {
        let _guard = self.inner.locks.lock(job_id).await;

        let Some(record) = self.inner.table.get(job_id).await? else {
            return Ok(false);
        };
        if record.status != JobStatus::Failed
            || record.attempt != expected_attempt
            || record.attempts_exhausted()
        {
            debug!(job_id, status = %record.status, "retry no longer applicable");
            return Ok(false);
        }

        info!(job_id, attempt = record.attempt + 1, "retrying job");
        let outcome = self.dispatch_locked(record, true).await?;
        Ok(matches!(outcome, SubmitOutcome::Accepted { .. }))
    }

    // ----------------------------
    // Maintenance
    // ----------------------------

    /// Fails in-flight records that saw no progress within `running_timeout`.
    pub async fn sweep_timeouts(&self) -> Result<usize, DispatchError> {
        let timeout = chrono::Duration::from_std(self.inner.cfg.running_timeout)
            .unwrap_or_else(|_| chrono::Duration::max_value());
        let now = Utc::now();

        let candidates = self
            .inner
            .table
            .list_by_status(
                &[JobStatus::Pending, JobStatus::Submitted, JobStatus::Running],
                self.inner.cfg.scan_batch,
            )
            .await?;

        let mut timed_out = 0;
        for stale in candidates
            .into_iter()
            .filter(|r| now.signed_duration_since(r.updated_at) > timeout)
        {
            let _guard = self.inner.locks.lock(&stale.job_id).await;
            let Some(current) = self.inner.table.get(&stale.job_id).await? else {
                continue;
            };
            if current.version != stale.version {
                continue;
            }

            warn!(
                job_id = %current.job_id,
                status = %current.status,
                attempt = current.attempt,
                "job exceeded running timeout"
            );
            let message = format!(
                "no outcome after {}s in {}",
                self.inner.cfg.running_timeout.as_secs(),
                current.status
            );
            self.fail_locked(current, ErrorCode::Timeout, &message).await?;
            timed_out += 1;
        }

        Ok(timed_out)
    }

    /// Runs retries whose timer was lost, e.g. across a restart.
    pub async fn recover_retries(&self) -> Result<usize, DispatchError> {
        let now = Utc::now();
        let failed = self
            .inner
            .table
            .list_by_status(&[JobStatus::Failed], self.inner.cfg.scan_batch)
            .await?;

        let mut retried = 0;
        for record in failed {
            let due = record.next_retry_at.map_or(true, |at| at <= now);
            let has_timer = self.inner.retries.lock().contains_key(&record.job_id);
            if !due || has_timer {
                continue;
            }
            if self.retry(&record.job_id, record.attempt).await? {
                retried += 1;
            }
        }
        Ok(retried)
    }

    /// Pulls outcomes for in-flight runs from the configured outcome source.
    pub async fn poll_outcomes(&self) -> Result<usize, DispatchError> {
        let Some(source) = self.inner.outcomes.clone() else {
            return Ok(0);
        };

        let in_flight = self
            .inner
            .table
            .list_by_status(
                &[JobStatus::Submitted, JobStatus::Running],
                self.inner.cfg.scan_batch,
            )
            .await?;

        let mut applied = 0;
        for record in in_flight {
            let Some(run_id) = record.backend_run_id.as_deref() else {
                continue;
            };

            let state = match source.poll(run_id).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(job_id = %record.job_id, run_id, error = %e, "outcome poll failed");
                    continue;
                }
            };
            let terminal = state.is_terminal();

            // a table error leaves the run state with the source for the next poll
            let ack = match state {
                RunState::Queued => continue,
                RunState::Running => self.mark_running(&record.job_id, record.attempt).await?,
                RunState::Succeeded => {
                    self.report_outcome(&record.job_id, record.attempt, JobResult::Succeeded)
                        .await?
                }
                RunState::Failed(message) => {
                    self.report_outcome(&record.job_id, record.attempt, JobResult::Failed(message))
                        .await?
                }
            };

            if terminal {
                source.forget(run_id).await;
            }
            if ack == ReportAck::Applied {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Drops terminal records older than the dedup window.
    pub async fn evict_expired(&self) -> Result<usize, DispatchError> {
        let window = chrono::Duration::from_std(self.inner.cfg.dedup_window)
            .unwrap_or_else(|_| chrono::Duration::max_value());
        let now = Utc::now();

        let terminal = self
            .inner
            .table
            .list_by_status(
                &[JobStatus::Succeeded, JobStatus::Abandoned],
                self.inner.cfg.scan_batch,
            )
            .await?;

        let mut evicted = 0;
        for expired in terminal
            .into_iter()
            .filter(|r| now.signed_duration_since(r.updated_at) > window)
        {
            let _guard = self.inner.locks.lock(&expired.job_id).await;
            if self
                .inner
                .table
                .delete(&expired.job_id, expired.version)
                .await?
            {
                debug!(job_id = %expired.job_id, status = %expired.status, "evicted job record");
                evicted += 1;
            }
        }
        Ok(evicted)
    }

    pub async fn run_maintenance(&self) -> Result<MaintenanceReport, DispatchError> {
        Ok(MaintenanceReport {
            timed_out: self.sweep_timeouts().await?,
            retried: self.recover_retries().await?,
            polled: self.poll_outcomes().await?,
            evicted: self.evict_expired().await?,
        })
    }

    // ----------------------------
    // Helpers
    // ----------------------------

    /// Compare-and-swap write of `apply(current)`. `None` means the record moved on.
    async fn transition(
        &self,
        current: &JobRecord,
        apply: impl FnOnce(&mut JobRecord),
    ) -> Result<Option<JobRecord>, TableError> {
        let mut next = current.clone();
        apply(&mut next);
        next.version = current.version + 1;
        next.updated_at = Utc::now();

        if self.inner.table.update(&next, current.version).await? {
            Ok(Some(next))
        } else {
            debug!(job_id = %current.job_id, "lost compare-and-swap");
            Ok(None)
        }
    }
}
