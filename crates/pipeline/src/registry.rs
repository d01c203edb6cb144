//! Dedup registry: collapses concurrent submissions of the same key.
//!
//! Admission is a check-and-set against the lock store. An existing holder
//! only blocks a new job while its ledger record is still Pending or
//! Running; a lock left behind by a finished job is taken over.
//!
//! Lock-store outages never block submission. The registry logs a warning
//! and admits a new job, trading perfect dedup for availability.

use std::sync::Arc;
use std::time::Duration;

use doculab_core::submission::SubmissionKey;
use doculab_core::types::JobId;
use doculab_store::{JobLedger, LockStore, StoreError};

/// Bound on check-and-set retries when the holder keeps changing under us.
const MAX_CAS_ATTEMPTS: usize = 8;

/// Result of [`DedupRegistry::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub job_id: JobId,
    /// `false` on the dedup path: an active job already owns the key.
    pub is_new: bool,
}

impl Admission {
    fn new_job(job_id: JobId) -> Self {
        Self {
            job_id,
            is_new: true,
        }
    }

    fn existing(job_id: JobId) -> Self {
        Self {
            job_id,
            is_new: false,
        }
    }
}

pub struct DedupRegistry {
    locks: Arc<dyn LockStore>,
    ledger: Arc<dyn JobLedger>,
    ttl: Duration,
}

impl DedupRegistry {
    pub fn new(locks: Arc<dyn LockStore>, ledger: Arc<dyn JobLedger>, ttl: Duration) -> Self {
        Self { locks, ledger, ttl }
    }

    /// Claim `key` for a freshly minted job, or return the active job that
    /// already holds it.
    pub async fn try_acquire(&self, key: &SubmissionKey) -> Admission {
        let lock_key = key.lock_key();
        let candidate = JobId::new();

        for _ in 0..MAX_CAS_ATTEMPTS {
            let holder = match self.locks.set_if_absent(&lock_key, candidate, self.ttl).await {
                Ok(None) => return Admission::new_job(candidate),
                Ok(Some(holder)) => holder,
                Err(e) => return self.degraded(key, candidate, &e),
            };

            if self.holder_is_active(&holder).await {
                return Admission::existing(holder);
            }

            match self
                .locks
                .replace_if(&lock_key, holder, candidate, self.ttl)
                .await
            {
                Ok(true) => {
                    tracing::info!(
                        submission_key = %key,
                        stale_job_id = %holder,
                        job_id = %candidate,
                        "Took over stale dedup lock",
                    );
                    return Admission::new_job(candidate);
                }
                // The holder changed between our read and write; look again.
                Ok(false) => continue,
                Err(e) => return self.degraded(key, candidate, &e),
            }
        }

        tracing::warn!(
            submission_key = %key,
            attempts = MAX_CAS_ATTEMPTS,
            "Dedup lock kept changing hands, admitting without lock",
        );
        Admission::new_job(candidate)
    }

    /// Release `key` if `job_id` still holds it. Never fails; errors are
    /// logged and the lock TTL covers what is left.
    pub async fn release(&self, key: &SubmissionKey, job_id: &JobId) {
        match self.locks.delete_if(&key.lock_key(), *job_id).await {
            Ok(true) => {
                tracing::debug!(submission_key = %key, job_id = %job_id, "Dedup lock released");
            }
            Ok(false) => {
                tracing::debug!(
                    submission_key = %key,
                    job_id = %job_id,
                    "Dedup lock already gone or held by another job",
                );
            }
            Err(e) => {
                tracing::warn!(
                    submission_key = %key,
                    job_id = %job_id,
                    error = %e,
                    "Failed to release dedup lock; it will expire on its own",
                );
            }
        }
    }

    /// Whether the lock holder still counts as running.
    ///
    /// A holder without a ledger record is mid-admission and counts as
    /// active, as does any holder whose record cannot be read.
    async fn holder_is_active(&self, holder: &JobId) -> bool {
        match self.ledger.get(holder).await {
            Ok(Some(record)) => record.state.is_active(),
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(job_id = %holder, error = %e, "Cannot read lock holder state");
                true
            }
        }
    }

    fn degraded(&self, key: &SubmissionKey, candidate: JobId, error: &StoreError) -> Admission {
        tracing::warn!(
            submission_key = %key,
            job_id = %candidate,
            error = %error,
            "Lock store unavailable, admitting as new job",
        );
        Admission::new_job(candidate)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use doculab_core::error::JobError;
    use doculab_core::job::JobRecord;
    use doculab_store::{MemoryJobLedger, MemoryLockStore};

    use super::*;

    const TTL: Duration = Duration::from_secs(3600);

    fn key() -> SubmissionKey {
        SubmissionKey::parse("budget-2024").unwrap()
    }

    fn registry() -> (DedupRegistry, Arc<MemoryLockStore>, Arc<MemoryJobLedger>) {
        let locks = Arc::new(MemoryLockStore::new());
        let ledger = Arc::new(MemoryJobLedger::new());
        let reg = DedupRegistry::new(locks.clone(), ledger.clone(), TTL);
        (reg, locks, ledger)
    }

    /// Lock store whose every call fails.
    struct DownLockStore;

    #[async_trait]
    impl LockStore for DownLockStore {
        async fn get(&self, _: &str) -> Result<Option<JobId>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn set_if_absent(&self, _: &str, _: JobId, _: Duration) -> Result<Option<JobId>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn replace_if(&self, _: &str, _: JobId, _: JobId, _: Duration) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn delete_if(&self, _: &str, _: JobId) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn purge_expired(&self) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn first_acquire_is_new_and_stores_lock() {
        let (reg, locks, _) = registry();
        let admission = reg.try_acquire(&key()).await;

        assert!(admission.is_new);
        assert_eq!(
            locks.get("processing:budget-2024").await.unwrap(),
            Some(admission.job_id)
        );
    }

    #[tokio::test]
    async fn active_holder_is_returned_on_dedup_path() {
        let (reg, _, ledger) = registry();
        let first = reg.try_acquire(&key()).await;
        ledger.insert(JobRecord::pending(first.job_id, key())).await.unwrap();

        let second = reg.try_acquire(&key()).await;
        assert_eq!(second, Admission::existing(first.job_id));

        ledger.mark_running(&first.job_id).await.unwrap();
        assert_eq!(reg.try_acquire(&key()).await, Admission::existing(first.job_id));
    }

    #[tokio::test]
    async fn holder_without_record_counts_as_active() {
        let (reg, _, _) = registry();
        let first = reg.try_acquire(&key()).await;
        assert_eq!(reg.try_acquire(&key()).await.job_id, first.job_id);
    }

    #[tokio::test]
    async fn stale_lock_of_finished_job_is_taken_over() {
        let (reg, locks, ledger) = registry();
        let first = reg.try_acquire(&key()).await;
        ledger.insert(JobRecord::pending(first.job_id, key())).await.unwrap();
        ledger
            .mark_failed(&first.job_id, &JobError::Workspace("disk full".into()))
            .await
            .unwrap();

        let second = reg.try_acquire(&key()).await;
        assert!(second.is_new);
        assert_ne!(second.job_id, first.job_id);
        assert_eq!(
            locks.get("processing:budget-2024").await.unwrap(),
            Some(second.job_id)
        );
    }

    #[tokio::test]
    async fn concurrent_acquires_admit_exactly_one_job() {
        let (reg, _, _) = registry();
        let reg = Arc::new(reg);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let reg = Arc::clone(&reg);
                tokio::spawn(async move { reg.try_acquire(&key()).await })
            })
            .collect();

        let mut admissions = Vec::new();
        for h in handles {
            admissions.push(h.await.unwrap());
        }
        assert_eq!(admissions.iter().filter(|a| a.is_new).count(), 1);
        let winner = admissions.iter().find(|a| a.is_new).unwrap().job_id;
        assert!(admissions.iter().all(|a| a.job_id == winner));
    }

    #[tokio::test]
    async fn release_only_drops_own_lock() {
        let (reg, locks, _) = registry();
        let admission = reg.try_acquire(&key()).await;

        reg.release(&key(), &JobId::new()).await;
        assert!(locks.get("processing:budget-2024").await.unwrap().is_some());

        reg.release(&key(), &admission.job_id).await;
        assert!(locks.get("processing:budget-2024").await.unwrap().is_none());

        // Second release is a harmless no-op.
        reg.release(&key(), &admission.job_id).await;
    }

    #[tokio::test]
    async fn lock_store_outage_degrades_to_new_job() {
        let ledger = Arc::new(MemoryJobLedger::new());
        let reg = DedupRegistry::new(Arc::new(DownLockStore), ledger, TTL);

        let a = reg.try_acquire(&key()).await;
        let b = reg.try_acquire(&key()).await;
        assert!(a.is_new && b.is_new);
        assert_ne!(a.job_id, b.job_id);

        reg.release(&key(), &a.job_id).await;
    }
}
