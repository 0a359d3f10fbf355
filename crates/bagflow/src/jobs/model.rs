use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Submitted,
    Running,
    Succeeded,
    Failed,
    Abandoned,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Submitted => "submitted",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Abandoned => "abandoned",
        }
    }

    /// Terminal records only leave the table through eviction.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Abandoned)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Submitted | JobStatus::Running
        )
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "submitted" => Ok(JobStatus::Submitted),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "abandoned" => Ok(JobStatus::Abandoned),
            other => Err(format!("invalid job status: {other}")),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to process one raw object. `job_id` is the idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_id: String,
    pub source_bucket: String,
    pub source_key: String,
    pub dest_bucket: String,
    pub dest_key: String,
    pub content_version: Option<String>,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

/// Dispatcher-owned lifecycle state for one `job_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
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
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Bumped on every write; updates are conditional on it.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn pending(request: &JobRequest, max_attempts: u32, now: DateTime<Utc>) -> Self {
        Self {
            job_id: request.job_id.clone(),
            status: JobStatus::Pending,
            attempt: request.attempt,
            max_attempts: max_attempts.max(1),
            source_bucket: request.source_bucket.clone(),
            source_key: request.source_key.clone(),
            dest_bucket: request.dest_bucket.clone(),
            dest_key: request.dest_key.clone(),
            content_version: request.content_version.clone(),
            backend_run_id: None,
            last_error: None,
            next_retry_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuilds the request for the record's current attempt.
    pub fn request(&self) -> JobRequest {
        JobRequest {
            job_id: self.job_id.clone(),
            source_bucket: self.source_bucket.clone(),
            source_key: self.source_key.clone(),
            dest_bucket: self.dest_bucket.clone(),
            dest_key: self.dest_key.clone(),
            content_version: self.content_version.clone(),
            attempt: self.attempt,
            created_at: self.created_at,
        }
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}
