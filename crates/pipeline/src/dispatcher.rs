//! Background job dispatcher.
//!
//! Admitted jobs are pushed onto a bounded queue by [`JobQueue`]. A single
//! long-lived [`JobDispatcher`] task pulls them, waits for a free worker
//! slot and runs each job on a tracked task, so shutdown can wait for
//! in-flight jobs to finish.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::executor::{JobExecutor, QueuedJob};

/// Reason recorded on jobs still queued when the dispatcher stops.
const SHUTDOWN_REASON: &str = "service shut down before the job started";

/// The dispatcher is gone and no longer accepts jobs.
#[derive(Debug, thiserror::Error)]
#[error("job queue is closed")]
pub struct QueueClosed(pub QueuedJob);

/// Sending half of the dispatch queue.
#[derive(Debug, Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<QueuedJob>,
}

impl JobQueue {
    /// Enqueue a job, waiting for space if the queue is full.
    pub async fn enqueue(&self, job: QueuedJob) -> Result<(), QueueClosed> {
        self.sender.send(job).await.map_err(|e| QueueClosed(e.0))
    }
}

/// Create a bounded dispatch queue.
pub fn job_queue(capacity: usize) -> (JobQueue, mpsc::Receiver<QueuedJob>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (JobQueue { sender }, receiver)
}

/// Pulls queued jobs and runs at most `max_concurrent` at a time.
pub struct JobDispatcher {
    receiver: mpsc::Receiver<QueuedJob>,
    executor: Arc<JobExecutor>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl JobDispatcher {
    pub fn new(
        receiver: mpsc::Receiver<QueuedJob>,
        executor: Arc<JobExecutor>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            receiver,
            executor,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tracker: TaskTracker::new(),
        }
    }

    /// Handle for waiting on in-flight jobs after [`run`](Self::run) returns.
    pub fn tracker(&self) -> TaskTracker {
        self.tracker.clone()
    }

    /// Run the dispatch loop until `cancel` fires or every queue sender is
    /// dropped.
    ///
    /// Jobs still queued at that point are marked failed and their keys
    /// released. Jobs already running are left to finish; wait on
    /// [`tracker`](Self::tracker) for them.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            max_concurrent = self.permits.available_permits(),
            "Job dispatcher started",
        );

        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let job = tokio::select! {
                _ = cancel.cancelled() => break,
                job = self.receiver.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            tracing::debug!(job_id = %job.job_id, "Dispatching job");
            let executor = Arc::clone(&self.executor);
            self.tracker.spawn(async move {
                executor.execute(job).await;
                drop(permit);
            });
        }

        tracing::info!("Job dispatcher shutting down");
        self.receiver.close();
        while let Ok(job) = self.receiver.try_recv() {
            self.executor.abandon(job, SHUTDOWN_REASON).await;
        }
        self.tracker.close();
    }
}
