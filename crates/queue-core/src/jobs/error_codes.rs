// src/jobs/error_codes.rs
use std::fmt;
use std::time::Duration;

/// A handler failure, carrying a short machine-readable code and a human message.
/// Persisted into `last_error` as `"{code}: {message}"` (truncated).
#[derive(Debug, Clone)]
pub struct JobError {
    pub code: String,
    pub message: String,
}

impl JobError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        let mut message: String = message.into();
        if message.len() > 500 {
            message.truncate(500);
        }
        Self {
            code: code.into(),
            message,
        }
    }

    /// Wraps an external collaborator failure (container CLI non-zero, HTTP non-2xx, §7).
    pub fn from_collaborator(context: &str, detail: &str) -> Self {
        let mut detail = detail.to_string();
        if detail.len() > 500 {
            detail.truncate(500);
        }
        Self::new("COLLABORATOR_FAILURE", format!("{context}: {detail}"))
    }

    pub fn as_last_error(&self) -> String {
        format!("{}: {}", self.code, self.message)
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for JobError {}

/// What a handler invocation produced (§9: sentinel return replacing exception control flow).
pub enum HandlerOutcome {
    /// Handler completed; mark the job succeeded.
    Done,
    /// Handler wants to be invoked again later without consuming retry budget (§4.7).
    Reschedule(Duration),
    /// Cooperative cancellation observed (`ThrowIfCancelRequested` equivalent, §4.5).
    Cancelled,
    /// Handler failed; Worker Pool decides retry vs terminal fail per §4.4.
    Failed(JobError),
}
