use std::fmt;

use serde::{Deserialize, Serialize};

/// Domain errors returned by the job service facade.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// ---------------------------------------------------------------------------
// Fatal job failures
// ---------------------------------------------------------------------------

/// Distinguished categories for a conversion that exited unsuccessfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureHint {
    /// The toolkit could not read the source document. By far the most
    /// common cause is that the spreadsheet was never shared with the
    /// service account.
    SharingPermission,
    /// The process was killed by a signal and reported no exit code.
    Terminated,
}

impl FailureHint {
    /// Classify a finished process by its exit code (`None` when killed).
    pub fn from_exit_code(exit_code: Option<i32>) -> Self {
        match exit_code {
            Some(_) => Self::SharingPermission,
            None => Self::Terminated,
        }
    }
}

/// Machine-readable tag for a [`JobError`], stored alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    WorkspaceError,
    ConversionFailed,
    PublishError,
    InternalError,
}

/// Errors that terminate a job and are recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The execution workspace could not be prepared. No process was launched.
    Workspace(String),
    /// The external conversion exited unsuccessfully.
    ConversionFailed {
        /// Process exit code (`-1` if killed by signal).
        exit_code: i32,
        hint: FailureHint,
        /// Submission key, echoed back in the hint text.
        submission_key: String,
    },
    /// Conversion succeeded but a produced artifact could not be copied out.
    Publish(String),
    /// Supervision failure: the process could not be launched or awaited,
    /// or the job task panicked.
    Internal(String),
}

impl JobError {
    pub fn conversion_failed(exit_code: Option<i32>, submission_key: impl Into<String>) -> Self {
        Self::ConversionFailed {
            exit_code: exit_code.unwrap_or(-1),
            hint: FailureHint::from_exit_code(exit_code),
            submission_key: submission_key.into(),
        }
    }

    pub fn kind(&self) -> JobErrorKind {
        match self {
            Self::Workspace(_) => JobErrorKind::WorkspaceError,
            Self::ConversionFailed { .. } => JobErrorKind::ConversionFailed,
            Self::Publish(_) => JobErrorKind::PublishError,
            Self::Internal(_) => JobErrorKind::InternalError,
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workspace(msg) => write!(f, "Workspace setup failed: {msg}"),
            Self::ConversionFailed {
                exit_code,
                hint: FailureHint::SharingPermission,
                submission_key,
            } => write!(
                f,
                "Script failed (exit {exit_code}) – maybe you forgot to share \
                 {submission_key} with Spectrum"
            ),
            Self::ConversionFailed {
                hint: FailureHint::Terminated,
                ..
            } => write!(f, "Script was terminated by a signal before it finished"),
            Self::Publish(msg) => write!(f, "Failed to copy generated files: {msg}"),
            Self::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for JobError {}

// ---------------------------------------------------------------------------
// Non-fatal log transport failures
// ---------------------------------------------------------------------------

/// A streamed output line could not be delivered.
///
/// Never fatal: the line is dropped and the job keeps running.
#[derive(Debug, thiserror::Error)]
pub enum StreamTransportError {
    #[error("log channel {0} is already closed")]
    ChannelClosed(String),

    #[error("log transport unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
