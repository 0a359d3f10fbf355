// crates/bagflow/src/api/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::jobs::dispatcher::ReportAck;
use crate::jobs::error_codes::{suggested_action, ErrorCode};
use crate::jobs::model::{JobRecord, JobStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: String,
    pub status: JobStatus,
    pub attempt: u32,
    pub max_attempts: u32,

    pub source_bucket: String,
    pub source_key: String,
    pub dest_bucket: String,
    pub dest_key: String,
    pub content_version: Option<String>,

    pub backend_run_id: Option<String>,
    pub last_error: Option<String>,
    pub error_code: Option<String>,
    pub suggested_action: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<JobRecord> for JobView {
    fn from(r: JobRecord) -> Self {
        let code = r.last_error.as_deref().map(ErrorCode::of_last_error);
        Self {
            job_id: r.job_id,
            status: r.status,
            attempt: r.attempt,
            max_attempts: r.max_attempts,
            source_bucket: r.source_bucket,
            source_key: r.source_key,
            dest_bucket: r.dest_bucket,
            dest_key: r.dest_key,
            content_version: r.content_version,
            backend_run_id: r.backend_run_id,
            last_error: r.last_error,
            error_code: code.map(|c| c.as_str().to_string()),
            suggested_action: code.map(|c| suggested_action(c).to_string()),
            next_retry_at: r.next_retry_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutcomeRequest {
    pub attempt: u32,
    pub result: OutcomeKind,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeResponse {
    pub ack: ReportAck,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
