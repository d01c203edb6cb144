//! The job service facade: `Submit`, `GetState` and `StreamLog`.

use std::sync::Arc;

use doculab_core::error::{CoreError, JobError};
use doculab_core::job::JobRecord;
use doculab_core::submission::SubmissionKey;
use doculab_core::types::JobId;
use doculab_events::{LogBroadcaster, LogSubscription};
use doculab_store::JobLedger;

use crate::dispatcher::JobQueue;
use crate::executor::QueuedJob;
use crate::registry::DedupRegistry;

/// Outcome of [`JobService::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub job_id: JobId,
    /// `false` when an active job for the same key was returned instead.
    pub created: bool,
}

pub struct JobService {
    registry: Arc<DedupRegistry>,
    ledger: Arc<dyn JobLedger>,
    broadcaster: Arc<LogBroadcaster>,
    queue: JobQueue,
}

impl JobService {
    pub fn new(
        registry: Arc<DedupRegistry>,
        ledger: Arc<dyn JobLedger>,
        broadcaster: Arc<LogBroadcaster>,
        queue: JobQueue,
    ) -> Self {
        Self {
            registry,
            ledger,
            broadcaster,
            queue,
        }
    }

    /// Admit a job for `raw_key`, or return the job already running for it.
    pub async fn submit(&self, raw_key: &str) -> Result<Submission, CoreError> {
        let key = SubmissionKey::parse(raw_key)?;
        let admission = self.registry.try_acquire(&key).await;
        if !admission.is_new {
            tracing::info!(
                submission_key = %key,
                job_id = %admission.job_id,
                "Duplicate submission joined running job",
            );
            return Ok(Submission {
                job_id: admission.job_id,
                created: false,
            });
        }

        let job_id = admission.job_id;
        if let Err(e) = self.ledger.insert(JobRecord::pending(job_id, key.clone())).await {
            self.registry.release(&key, &job_id).await;
            return Err(CoreError::Internal(format!("Cannot record job: {e}")));
        }

        let job = QueuedJob {
            job_id,
            submission_key: key.clone(),
        };
        if self.queue.enqueue(job).await.is_err() {
            let error = JobError::Internal("job queue is closed".into());
            if let Err(e) = self.ledger.mark_failed(&job_id, &error).await {
                tracing::warn!(job_id = %job_id, error = %e, "Cannot record rejected job");
            }
            self.broadcaster.finish(&job_id);
            self.registry.release(&key, &job_id).await;
            return Err(CoreError::Internal("Job queue is closed".into()));
        }

        tracing::info!(submission_key = %key, job_id = %job_id, "Job submitted");
        Ok(Submission {
            job_id,
            created: true,
        })
    }

    /// Snapshot of a job's record.
    pub async fn get_state(&self, job_id: &JobId) -> Result<JobRecord, CoreError> {
        self.ledger
            .get(job_id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                entity: "Job",
                id: job_id.to_string(),
            })
    }

    /// Live tail of a job's output.
    ///
    /// A finished job yields only the end marker.
    pub async fn stream_log(&self, job_id: &JobId) -> Result<LogSubscription, CoreError> {
        let record = self.get_state(job_id).await?;
        if record.state.is_terminal() {
            return Ok(LogSubscription::ended(*job_id));
        }
        Ok(self.broadcaster.subscribe(job_id))
    }
}
