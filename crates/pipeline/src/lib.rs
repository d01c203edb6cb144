//! Job orchestration pipeline.
//!
//! Wires the dedup registry, workspace manager, process runner, artifact
//! publisher and job ledger into the job lifecycle, and exposes it through
//! [`JobService`]. Execution is enqueue-then-async: [`JobService::submit`]
//! records a Pending job and queues it, and [`JobDispatcher`] runs it.

pub mod config;
pub mod dispatcher;
pub mod executor;
pub mod publisher;
pub mod registry;
pub mod service;
pub mod workspace;

use std::sync::Arc;

use doculab_events::LogBroadcaster;
use doculab_store::Stores;

pub use config::{PipelineConfig, ToolkitLayout};
pub use dispatcher::JobDispatcher;
pub use service::{JobService, Submission};

/// Build the service facade and its dispatcher from shared resources.
///
/// The dispatcher must be run (see [`JobDispatcher::run`]) for submitted
/// jobs to execute.
pub fn build(
    config: &PipelineConfig,
    stores: &Stores,
    broadcaster: Arc<LogBroadcaster>,
) -> (JobService, JobDispatcher) {
    let registry = Arc::new(registry::DedupRegistry::new(
        stores.locks.clone(),
        stores.ledger.clone(),
        config.lock_ttl,
    ));
    let executor = Arc::new(executor::JobExecutor::new(
        workspace::WorkspaceManager::new(config.toolkit.clone(), &config.work_root),
        publisher::ArtifactPublisher::new(&config.output_dir, config.output_public_prefix.clone()),
        broadcaster.clone(),
        stores.ledger.clone(),
        registry.clone(),
    ));

    let (queue, receiver) = dispatcher::job_queue(config.queue_capacity);
    let dispatcher = JobDispatcher::new(receiver, executor, config.max_concurrent_jobs);
    let service = JobService::new(registry, stores.ledger.clone(), broadcaster, queue);
    (service, dispatcher)
}
