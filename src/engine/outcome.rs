//! Job Outcomes
//!
//! Every pool slot job ends in a [`JobOutcome`]. Errors raised inside the
//! job are classified here and never propagate past the slot.

use hyper::StatusCode;

use crate::error::{Error, FailureKind};

/// Result of one slot job.
#[derive(Debug)]
pub enum JobOutcome<T> {
    /// The job ran to its terminal state
    Done(T),
    /// The job was handed to a background task (asynchronous mode)
    Dispatched,
    /// The job stopped early
    Failed(JobFailure),
}

impl<T> JobOutcome<T> {
    /// Convert a job result, classifying any error.
    pub fn from_result(result: crate::error::Result<T>) -> Self {
        match result {
            Ok(value) => JobOutcome::Done(value),
            Err(e) => JobOutcome::Failed(JobFailure::from(e)),
        }
    }

    /// The boolean outcome flag: done or dispatched.
    pub fn is_success(&self) -> bool {
        !matches!(self, JobOutcome::Failed(_))
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        match self {
            JobOutcome::Failed(f) => Some(f),
            _ => None,
        }
    }

    /// The value of a finished job.
    pub fn into_value(self) -> Option<T> {
        match self {
            JobOutcome::Done(value) => Some(value),
            _ => None,
        }
    }

    /// Back to a `Result`; a dispatched job yields `Ok(None)`.
    pub fn into_result(self, operation: &str) -> crate::error::Result<Option<T>> {
        match self {
            JobOutcome::Done(value) => Ok(Some(value)),
            JobOutcome::Dispatched => Ok(None),
            JobOutcome::Failed(failure) => Err(failure.into_error(operation)),
        }
    }

    /// Metric label for this outcome.
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Done(_) => "done",
            JobOutcome::Dispatched => "dispatched",
            JobOutcome::Failed(_) => "failed",
        }
    }
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
    pub retryable: bool,
}

impl JobFailure {
    /// HTTP status a front end should answer with.
    pub fn status_code(&self) -> StatusCode {
        self.kind.status_code()
    }

    pub fn into_error(self, operation: &str) -> Error {
        Error::JobFailed {
            operation: operation.to_string(),
            kind: self.kind,
            message: self.message,
        }
    }
}

impl From<Error> for JobFailure {
    fn from(e: Error) -> Self {
        Self {
            kind: e.kind(),
            retryable: e.is_retryable(),
            message: e.to_string(),
        }
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
