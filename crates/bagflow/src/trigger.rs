use serde::Serialize;
use tracing::{error, info, instrument};

use crate::error::DispatchError;
use crate::events::{NotificationFilter, StorageEvent};
use crate::jobs::builder::JobRequestBuilder;
use crate::jobs::dispatcher::{Dispatcher, SubmitOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOutcome {
    Accepted,
    Deduplicated,
    Rejected,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResult {
    pub object_key: String,
    pub outcome: FileOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Set when the file failed because the job table was unreachable.
    #[serde(skip)]
    pub unavailable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Success,
    /// Some files failed, others went through.
    Partial,
    /// Every actionable file failed.
    Error,
    NoAction,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerReport {
    pub status: ReportStatus,
    pub results: Vec<FileResult>,
}

impl TriggerReport {
    fn from_results(results: Vec<FileResult>) -> Self {
        let failed = results
            .iter()
            .filter(|r| r.outcome == FileOutcome::Error)
            .count();
        let status = if results.is_empty() {
            ReportStatus::NoAction
        } else if failed == results.len() {
            ReportStatus::Error
        } else if failed > 0 {
            ReportStatus::Partial
        } else {
            ReportStatus::Success
        };
        Self { status, results }
    }

    /// True when there was work and none of it could reach the job table.
    pub fn all_unavailable(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.unavailable)
    }
}

/// Filter, build and submit for every record of a notification.
#[derive(Clone)]
pub struct TriggerService {
    filter: NotificationFilter,
    builder: JobRequestBuilder,
    dispatcher: Dispatcher,
}

impl TriggerService {
    pub fn new(filter: NotificationFilter, builder: JobRequestBuilder, dispatcher: Dispatcher) -> Self {
        Self {
            filter,
            builder,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// One slot per actionable file; a failure in one file never aborts the others.
    #[instrument(skip_all, fields(records = event.records().len()))]
    pub async fn handle(&self, event: &StorageEvent) -> TriggerReport {
        let mut results = Vec::new();

        for file in self.filter.filter(event) {
            let request = self.builder.build(&file);
            let job_id = request.job_id.clone();
            let object_key = file.object_key.clone();

            let result = match self.dispatcher.submit(request).await {
                Ok(SubmitOutcome::Accepted { attempt }) => FileResult {
                    object_key,
                    outcome: FileOutcome::Accepted,
                    job_id: Some(job_id),
                    detail: (attempt > 1).then(|| format!("attempt {attempt}")),
                    unavailable: false,
                },
                Ok(SubmitOutcome::Deduplicated { status }) => FileResult {
                    object_key,
                    outcome: FileOutcome::Deduplicated,
                    job_id: Some(job_id),
                    detail: Some(format!("job already {status}")),
                    unavailable: false,
                },
                Ok(SubmitOutcome::Rejected { reason }) => FileResult {
                    object_key,
                    outcome: FileOutcome::Rejected,
                    job_id: Some(job_id),
                    detail: Some(reason),
                    unavailable: false,
                },
                Err(e @ DispatchError::BackendUnavailable(_)) => {
                    error!(job_id = %job_id, key = %object_key, error = %e, "submit failed");
                    FileResult {
                        object_key,
                        outcome: FileOutcome::Error,
                        job_id: Some(job_id),
                        detail: Some(e.to_string()),
                        unavailable: true,
                    }
                }
            };
            results.push(result);
        }

        let report = TriggerReport::from_results(results);
        info!(
            status = ?report.status,
            files = report.results.len(),
            "notification handled"
        );
        report
    }
}
