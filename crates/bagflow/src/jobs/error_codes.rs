// crates/bagflow/src/jobs/error_codes.rs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    SubmitTransport,
    JobExecution,
    Timeout,
    AttemptsExhausted,
    ManualAbandon,
    Unknown,
}

impl ErrorCode {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "SUBMIT_TRANSPORT" => Self::SubmitTransport,
            "JOB_EXECUTION" => Self::JobExecution,
            "TIMEOUT" => Self::Timeout,
            "ATTEMPTS_EXHAUSTED" => Self::AttemptsExhausted,
            "MANUAL_ABANDON" => Self::ManualAbandon,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubmitTransport => "SUBMIT_TRANSPORT",
            Self::JobExecution => "JOB_EXECUTION",
            Self::Timeout => "TIMEOUT",
            Self::AttemptsExhausted => "ATTEMPTS_EXHAUSTED",
            Self::ManualAbandon => "MANUAL_ABANDON",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// `last_error` values are stored as `CODE: message`.
    pub fn format(&self, message: &str) -> String {
        format!("{}: {}", self.as_str(), message)
    }

    pub fn of_last_error(last_error: &str) -> Self {
        last_error
            .split_once(':')
            .map(|(code, _)| Self::parse(code))
            .unwrap_or(Self::Unknown)
    }
}

pub fn suggested_action(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::SubmitTransport => {
            "Retry is automatic. Check that the execution backend API is reachable and credentials are valid."
        }
        ErrorCode::JobExecution => {
            "Retry is automatic. Inspect the processing job logs for the failing attempt."
        }
        ErrorCode::Timeout => {
            "No outcome arrived in time. Check backend run status and whether callbacks/polling reach the trigger."
        }
        ErrorCode::AttemptsExhausted => {
            "Manual intervention required. Fix the cause, then re-upload the object or replay its notification after the record is evicted."
        }
        ErrorCode::ManualAbandon => "Abandoned by an operator. No automatic retries will run.",
        ErrorCode::Unknown => "Inspect last_error and the trigger logs.",
    }
}
