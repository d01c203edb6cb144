//! Job lifecycle: `Pending -> Running -> {Succeeded, Failed}`.
//!
//! [`JobRecord`] enforces the transition rules itself so every ledger
//! implementation gets the same guarantees: terminal states are immutable
//! and a record can only move forward.

use serde::{Deserialize, Serialize};

use crate::artifacts::ResultManifest;
use crate::error::{CoreError, JobError, JobErrorKind};
use crate::submission::SubmissionKey;
use crate::types::{JobId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Pending or Running: the job still owns its submission key.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }
}

/// Ledger entry for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub submission_key: SubmissionKey,
    pub state: JobState,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    /// Published artifacts, set only when `state == Succeeded`.
    pub result: Option<ResultManifest>,
    /// Human-readable failure, set only when `state == Failed`.
    pub error: Option<String>,
    pub error_kind: Option<JobErrorKind>,
}

impl JobRecord {
    /// A freshly admitted job.
    pub fn pending(job_id: JobId, submission_key: SubmissionKey) -> Self {
        Self {
            job_id,
            submission_key,
            state: JobState::Pending,
            created_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            error_kind: None,
        }
    }

    pub fn mark_running(&mut self) -> Result<(), CoreError> {
        self.transition(JobState::Running)?;
        self.started_at = Some(chrono::Utc::now());
        Ok(())
    }

    pub fn succeed(&mut self, manifest: ResultManifest) -> Result<(), CoreError> {
        self.transition(JobState::Succeeded)?;
        self.finished_at = Some(chrono::Utc::now());
        self.result = Some(manifest);
        Ok(())
    }

    pub fn fail(&mut self, error: &JobError) -> Result<(), CoreError> {
        self.transition(JobState::Failed)?;
        self.finished_at = Some(chrono::Utc::now());
        self.error = Some(error.to_string());
        self.error_kind = Some(error.kind());
        Ok(())
    }

    fn transition(&mut self, next: JobState) -> Result<(), CoreError> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::Conflict(format!(
                "Job {} cannot move from {} to {}",
                self.job_id,
                self.state.as_str(),
                next.as_str()
            )));
        }
        self.state = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::artifacts::ArtifactKind;

    fn record() -> JobRecord {
        JobRecord::pending(JobId::new(), SubmissionKey::parse("budget-2024").unwrap())
    }

    #[test]
    fn happy_path_sets_timestamps_and_result() {
        let mut rec = record();
        rec.mark_running().expect("pending -> running");
        assert!(rec.started_at.is_some());

        let mut manifest = ResultManifest::new();
        manifest.insert(ArtifactKind::StructuredData, "out/budget-2024.json");
        rec.succeed(manifest.clone()).expect("running -> succeeded");

        assert_eq!(rec.state, JobState::Succeeded);
        assert_eq!(rec.result, Some(manifest));
        assert!(rec.finished_at.is_some());
        assert!(rec.error.is_none());
    }

    #[test]
    fn failure_records_message_and_kind() {
        let mut rec = record();
        rec.mark_running().unwrap();
        rec.fail(&JobError::conversion_failed(Some(2), "budget-2024"))
            .expect("running -> failed");

        assert_eq!(rec.state, JobState::Failed);
        assert_eq!(rec.error_kind, Some(JobErrorKind::ConversionFailed));
        assert!(rec.error.as_deref().unwrap().contains("exit 2"));
        assert!(rec.result.is_none());
    }

    #[test]
    fn pending_job_can_fail_directly() {
        let mut rec = record();
        rec.fail(&JobError::Internal("queue closed".into()))
            .expect("pending -> failed");
        assert_eq!(rec.state, JobState::Failed);
    }

    #[test]
    fn terminal_states_are_immutable() {
        let mut rec = record();
        rec.mark_running().unwrap();
        rec.succeed(ResultManifest::new()).unwrap();
        let snapshot = rec.clone();

        assert_matches!(rec.mark_running(), Err(CoreError::Conflict(_)));
        assert_matches!(
            rec.fail(&JobError::Internal("late".into())),
            Err(CoreError::Conflict(_))
        );
        assert_matches!(rec.succeed(ResultManifest::new()), Err(CoreError::Conflict(_)));
        assert_eq!(rec, snapshot);
    }

    #[test]
    fn cannot_skip_running() {
        let mut rec = record();
        assert_matches!(rec.succeed(ResultManifest::new()), Err(CoreError::Conflict(_)));
        assert_eq!(rec.state, JobState::Pending);
    }

    #[test]
    fn state_serializes_lowercase() {
        assert_eq!(serde_json::to_value(JobState::Succeeded).unwrap(), "succeeded");
        assert!(JobState::Running.is_active());
        assert!(JobState::Failed.is_terminal());
    }
}
