//! Job execution: `Pending -> Running -> {Succeeded, Failed}`.
//!
//! [`JobExecutor::execute`] drives one admitted job through workspace
//! preparation, the conversion run and artifact publication, then records
//! the outcome. The closing steps (ledger update, stream end marker, lock
//! release) run on every exit path, including a panic in the stages.

use std::future::Future;
use std::sync::Arc;

use doculab_core::artifacts::{ArtifactKind, ResultManifest};
use doculab_core::error::JobError;
use doculab_core::scripting::runner::ProcessRunner;
use doculab_core::submission::SubmissionKey;
use doculab_core::types::JobId;
use doculab_events::LogBroadcaster;
use doculab_store::JobLedger;
use tracing::Instrument;

use crate::publisher::ArtifactPublisher;
use crate::registry::DedupRegistry;
use crate::workspace::{Workspace, WorkspaceManager};

/// An admitted job waiting for a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub job_id: JobId,
    pub submission_key: SubmissionKey,
}

pub struct JobExecutor {
    workspaces: WorkspaceManager,
    runner: ProcessRunner,
    publisher: ArtifactPublisher,
    broadcaster: Arc<LogBroadcaster>,
    ledger: Arc<dyn JobLedger>,
    registry: Arc<DedupRegistry>,
}

impl JobExecutor {
    pub fn new(
        workspaces: WorkspaceManager,
        publisher: ArtifactPublisher,
        broadcaster: Arc<LogBroadcaster>,
        ledger: Arc<dyn JobLedger>,
        registry: Arc<DedupRegistry>,
    ) -> Self {
        let runner = ProcessRunner::new(broadcaster.clone());
        Self {
            workspaces,
            runner,
            publisher,
            broadcaster,
            ledger,
            registry,
        }
    }

    /// Run `job` to completion and record its outcome.
    pub async fn execute(self: Arc<Self>, job: QueuedJob) {
        let span = tracing::info_span!(
            "job",
            job_id = %job.job_id,
            submission_key = %job.submission_key,
        );
        async move {
            if let Err(e) = self.ledger.mark_running(&job.job_id).await {
                tracing::error!(error = %e, "Cannot mark job running, skipping execution");
                let error = JobError::Internal(format!("job could not be started: {e}"));
                self.record(&job, Err(error)).await;
                self.close(&job).await;
                return;
            }
            tracing::info!("Job started");

            let outcome = supervise(Arc::clone(&self).run_stages(job.clone())).await;

            // The key stays claimed until the terminal state is written, so
            // a resubmission never runs beside a job that still reads as
            // active. `record` only logs store failures, so `close` always
            // runs.
            self.record(&job, outcome).await;
            self.close(&job).await;
        }
        .instrument(span)
        .await
    }

    /// Fail a job that will never run (e.g. the service is shutting down)
    /// and free its key.
    pub async fn abandon(&self, job: QueuedJob, reason: &str) {
        tracing::warn!(job_id = %job.job_id, submission_key = %job.submission_key, reason, "Job abandoned");
        let error = JobError::Internal(reason.to_string());
        if let Err(e) = self.ledger.mark_failed(&job.job_id, &error).await {
            tracing::warn!(job_id = %job.job_id, error = %e, "Cannot record abandoned job");
        }
        self.close(&job).await;
    }

    async fn close(&self, job: &QueuedJob) {
        self.broadcaster.finish(&job.job_id);
        self.registry.release(&job.submission_key, &job.job_id).await;
    }

    async fn run_stages(self: Arc<Self>, job: QueuedJob) -> Result<ResultManifest, JobError> {
        let workspace = self
            .workspaces
            .prepare(&job.job_id)
            .await
            .map_err(|e| JobError::Workspace(e.to_string()))?;

        let result = self.convert_and_publish(&job, &workspace).await;
        workspace.destroy().await;
        result
    }

    async fn convert_and_publish(
        &self,
        job: &QueuedJob,
        workspace: &Workspace,
    ) -> Result<ResultManifest, JobError> {
        let outcome = self
            .runner
            .run(
                &job.job_id,
                workspace.root(),
                workspace.entrypoint(),
                &[job.submission_key.as_str()],
            )
            .await
            .map_err(|e| JobError::Internal(e.to_string()))?;

        if !outcome.success() {
            return Err(JobError::conversion_failed(
                outcome.exit_code,
                job.submission_key.as_str(),
            ));
        }

        self.publisher
            .publish(&job.submission_key, workspace, &ArtifactKind::ALL)
            .await
            .map_err(|e| JobError::Publish(e.to_string()))
    }

    async fn record(&self, job: &QueuedJob, outcome: Result<ResultManifest, JobError>) {
        let stored = match outcome {
            Ok(manifest) => {
                tracing::info!(artifacts = manifest.len(), "Job succeeded");
                self.ledger.mark_succeeded(&job.job_id, manifest).await
            }
            Err(error) => {
                tracing::error!(kind = ?error.kind(), error = %error, "Job failed");
                self.ledger.mark_failed(&job.job_id, &error).await
            }
        };
        if let Err(e) = stored {
            tracing::error!(error = %e, "Failed to record job outcome");
        }
    }
}

/// Run the job stages on their own task so a panic surfaces as a job
/// failure instead of unwinding through the cleanup path.
async fn supervise<F>(stages: F) -> Result<ResultManifest, JobError>
where
    F: Future<Output = Result<ResultManifest, JobError>> + Send + 'static,
{
    match tokio::spawn(stages.in_current_span()).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => Err(JobError::Internal("job execution panicked".into())),
        Err(_) => Err(JobError::Internal("job execution was cancelled".into())),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
