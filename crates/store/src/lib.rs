//! Process-wide shared stores.
//!
//! Two key-value stores back the orchestration layer: the dedup lock store
//! (`processing:{key}` -> job id, with expiry) and the job ledger (job id ->
//! [`JobRecord`](doculab_core::job::JobRecord)). Both sit behind traits so
//! the pipeline never depends on a concrete backend. The in-memory
//! implementations are constructed once at startup and shared via `Arc`.

pub mod error;
pub mod ledger;
pub mod locks;

use std::sync::Arc;

pub use error::StoreError;
pub use ledger::{JobLedger, MemoryJobLedger};
pub use locks::{LockStore, MemoryLockStore};

/// Store handles injected into the pipeline.
#[derive(Clone)]
pub struct Stores {
    pub locks: Arc<dyn LockStore>,
    pub ledger: Arc<dyn JobLedger>,
}

impl Stores {
    /// Fresh in-memory stores.
    pub fn in_memory() -> Self {
        Self {
            locks: Arc::new(MemoryLockStore::new()),
            ledger: Arc::new(MemoryJobLedger::new()),
        }
    }
}
