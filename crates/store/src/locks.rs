//! Dedup lock store: `lock key -> JobId` with a time-to-live.
//!
//! Every write is a single atomic check-and-set so two concurrent
//! submissions for the same key can never both claim it. Expired entries
//! behave exactly like absent ones; [`LockStore::purge_expired`] only
//! reclaims their memory.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use doculab_core::types::JobId;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::StoreError;

#[async_trait]
pub trait LockStore: Send + Sync {
    /// Current live holder of `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<JobId>, StoreError>;

    /// Claim `key` for `job_id` unless a live entry exists.
    ///
    /// Returns `None` when the claim succeeded, otherwise the current holder.
    async fn set_if_absent(
        &self,
        key: &str,
        job_id: JobId,
        ttl: Duration,
    ) -> Result<Option<JobId>, StoreError>;

    /// Hand `key` from `expected` to `new`, only if `expected` still holds it.
    async fn replace_if(
        &self,
        key: &str,
        expected: JobId,
        new: JobId,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Delete `key` only if it is still held by `job_id`.
    ///
    /// Returns `false` when the entry was already gone, expired, or taken
    /// over by another job.
    async fn delete_if(&self, key: &str, job_id: JobId) -> Result<bool, StoreError>;

    /// Drop expired entries. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct LockEntry {
    job_id: JobId,
    expires_at: Instant,
}

impl LockEntry {
    fn new(job_id: JobId, ttl: Duration) -> Self {
        Self {
            job_id,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Lock store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    entries: Mutex<HashMap<String, LockEntry>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn get(&self, key: &str) -> Result<Option<JobId>, StoreError> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.job_id))
    }

    async fn set_if_absent(
        &self,
        key: &str,
        job_id: JobId,
        ttl: Duration,
    ) -> Result<Option<JobId>, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(key).filter(|entry| entry.is_live(now)) {
            return Ok(Some(existing.job_id));
        }
        entries.insert(key.to_string(), LockEntry::new(job_id, ttl));
        Ok(None)
    }

    async fn replace_if(
        &self,
        key: &str,
        expected: JobId,
        new: JobId,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) && entry.job_id == expected => {
                entries.insert(key.to_string(), LockEntry::new(new, ttl));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_if(&self, key: &str, job_id: JobId) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.job_id == job_id => {
                let was_live = entry.is_live(now);
                entries.remove(key);
                Ok(was_live)
            }
            _ => Ok(false),
        }
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        let purged = before - entries.len();
        if purged > 0 {
            tracing::debug!(purged, "Purged expired dedup locks");
        }
        Ok(purged)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
