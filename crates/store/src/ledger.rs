//! Job ledger: `JobId -> JobRecord`.
//!
//! Each job has a single writer (the admission path, then the executor
//! running it), so the ledger only has to enforce the record's own
//! transition rules. Reads return snapshots.

use std::collections::HashMap;

use async_trait::async_trait;
use doculab_core::artifacts::ResultManifest;
use doculab_core::error::{CoreError, JobError};
use doculab_core::job::JobRecord;
use doculab_core::types::{JobId, Timestamp};
use tokio::sync::RwLock;

use crate::error::StoreError;

#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Record a newly admitted job. Fails with `Conflict` if the id exists.
    async fn insert(&self, record: JobRecord) -> Result<(), StoreError>;

    async fn get(&self, job_id: &JobId) -> Result<Option<JobRecord>, StoreError>;

    async fn mark_running(&self, job_id: &JobId) -> Result<JobRecord, StoreError>;

    async fn mark_succeeded(
        &self,
        job_id: &JobId,
        manifest: ResultManifest,
    ) -> Result<JobRecord, StoreError>;

    async fn mark_failed(&self, job_id: &JobId, error: &JobError) -> Result<JobRecord, StoreError>;

    /// Remove terminal records that finished before `cutoff`.
    ///
    /// Pending and Running records are never removed.
    async fn purge_terminal_before(&self, cutoff: Timestamp) -> Result<usize, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Ledger held in process memory.
#[derive(Debug, Default)]
pub struct MemoryJobLedger {
    records: RwLock<HashMap<JobId, JobRecord>>,
}

impl MemoryJobLedger {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<F>(&self, job_id: &JobId, apply: F) -> Result<JobRecord, StoreError>
    where
        F: FnOnce(&mut JobRecord) -> Result<(), CoreError> + Send,
    {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;

        // Apply to a copy so a rejected transition leaves the stored record untouched.
        let mut next = record.clone();
        apply(&mut next).map_err(|e| StoreError::Conflict(e.to_string()))?;
        *record = next.clone();
        Ok(next)
    }
}

#[async_trait]
impl JobLedger for MemoryJobLedger {
    async fn insert(&self, record: JobRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.job_id) {
            return Err(StoreError::Conflict(format!(
                "Job {} already exists",
                record.job_id
            )));
        }
        records.insert(record.job_id, record);
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.records.read().await.get(job_id).cloned())
    }

    async fn mark_running(&self, job_id: &JobId) -> Result<JobRecord, StoreError> {
        self.update(job_id, |record| record.mark_running()).await
    }

    async fn mark_succeeded(
        &self,
        job_id: &JobId,
        manifest: ResultManifest,
    ) -> Result<JobRecord, StoreError> {
        self.update(job_id, move |record| record.succeed(manifest)).await
    }

    async fn mark_failed(&self, job_id: &JobId, error: &JobError) -> Result<JobRecord, StoreError> {
        self.update(job_id, |record| record.fail(error)).await
    }

    async fn purge_terminal_before(&self, cutoff: Timestamp) -> Result<usize, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| match record.finished_at {
            Some(finished) if record.state.is_terminal() => finished >= cutoff,
            _ => true,
        });
        let purged = before - records.len();
        if purged > 0 {
            tracing::debug!(purged, "Purged terminal job records");
        }
        Ok(purged)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use doculab_core::artifacts::ArtifactKind;
    use doculab_core::job::JobState;
    use doculab_core::submission::SubmissionKey;

    use super::*;

    fn pending() -> JobRecord {
        JobRecord::pending(JobId::new(), SubmissionKey::parse("budget-2024").unwrap())
    }

    #[tokio::test]
    async fn insert_then_get_returns_snapshot() {
        let ledger = MemoryJobLedger::new();
        let record = pending();
        let id = record.job_id;
        ledger.insert(record.clone()).await.unwrap();

        assert_eq!(ledger.get(&id).await.unwrap(), Some(record));
        assert_eq!(ledger.get(&JobId::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let ledger = MemoryJobLedger::new();
        let record = pending();
        ledger.insert(record.clone()).await.unwrap();

        assert_matches!(ledger.insert(record).await, Err(StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn lifecycle_updates_are_persisted() {
        let ledger = MemoryJobLedger::new();
        let record = pending();
        let id = record.job_id;
        ledger.insert(record).await.unwrap();

        let running = ledger.mark_running(&id).await.unwrap();
        assert_eq!(running.state, JobState::Running);

        let mut manifest = ResultManifest::new();
        manifest.insert(ArtifactKind::PrimaryDocument, "out/budget-2024.odt");
        ledger.mark_succeeded(&id, manifest.clone()).await.unwrap();

        let stored = ledger.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Succeeded);
        assert_eq!(stored.result, Some(manifest));
    }

    #[tokio::test]
    async fn terminal_record_is_immutable_and_reads_are_stable() {
        let ledger = MemoryJobLedger::new();
        let record = pending();
        let id = record.job_id;
        ledger.insert(record).await.unwrap();
        ledger.mark_running(&id).await.unwrap();
        ledger
            .mark_failed(&id, &JobError::conversion_failed(Some(2), "budget-2024"))
            .await
            .unwrap();

        let first = ledger.get(&id).await.unwrap();
        assert_matches!(
            ledger.mark_succeeded(&id, ResultManifest::new()).await,
            Err(StoreError::Conflict(_))
        );
        assert_matches!(ledger.mark_running(&id).await, Err(StoreError::Conflict(_)));
        assert_eq!(ledger.get(&id).await.unwrap(), first);
    }

    #[tokio::test]
    async fn updating_unknown_job_is_not_found() {
        let ledger = MemoryJobLedger::new();
        assert_matches!(
            ledger.mark_running(&JobId::new()).await,
            Err(StoreError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn purge_keeps_active_and_recent_records() {
        let ledger = MemoryJobLedger::new();

        let active = pending();
        let active_id = active.job_id;
        ledger.insert(active).await.unwrap();

        let done = pending();
        let done_id = done.job_id;
        ledger.insert(done).await.unwrap();
        ledger
            .mark_failed(&done_id, &JobError::Workspace("disk full".into()))
            .await
            .unwrap();

        let past = chrono::Utc::now() - chrono::Duration::hours(1);
        assert_eq!(ledger.purge_terminal_before(past).await.unwrap(), 0);

        let future = chrono::Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(ledger.purge_terminal_before(future).await.unwrap(), 1);
        assert!(ledger.get(&done_id).await.unwrap().is_none());
        assert!(ledger.get(&active_id).await.unwrap().is_some());
    }
}
