// crates/bagflow/src/error.rs

/// Boundary input that cannot be read as a storage notification at all.
/// Individual records with missing fields are not malformed; they are filtered out.
#[derive(Debug, thiserror::Error)]
pub enum MalformedEventError {
    #[error("body is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("event has no Records field")]
    MissingRecords,
    #[error("Records field is not an array")]
    RecordsNotArray,
}

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("job table unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt job record {job_id}: {reason}")]
    Corrupt { job_id: String, reason: String },
}

impl From<sqlx::Error> for TableError {
    fn from(e: sqlx::Error) -> Self {
        TableError::Unavailable(e.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Transport(String),
    #[error("backend answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected backend response: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        BackendError::Transport(e.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("backend unavailable: {0}")]
    BackendUnavailable(#[from] TableError),
}
