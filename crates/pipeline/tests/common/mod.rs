#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use doculab_core::job::JobRecord;
use doculab_core::types::JobId;
use doculab_events::LogBroadcaster;
use doculab_pipeline::{JobService, PipelineConfig, ToolkitLayout};
use doculab_store::{JobLedger, MemoryJobLedger, MemoryLockStore, Stores};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub const COMPONENTS: [&str; 3] = ["gsheet-to-json", "json-to-odt", "json-to-docx"];
pub const ENTRYPOINT: &str = "all-formats-from-gsheet.sh";

/// A running pipeline over temp directories and a fake toolkit.
pub struct Harness {
    pub service: Arc<JobService>,
    pub stores: Stores,
    pub broadcaster: Arc<LogBroadcaster>,
    pub cancel: CancellationToken,
    pub dispatcher: JoinHandle<()>,
    pub tracker: TaskTracker,
    pub toolkit: tempfile::TempDir,
    pub work: tempfile::TempDir,
    pub shared: tempfile::TempDir,
    pub work_root: PathBuf,
}

/// Write a toolkit whose entrypoint runs `script_body` under bash.
pub fn write_toolkit(dir: &Path, script_body: &str) -> ToolkitLayout {
    for component in COMPONENTS {
        let conf = dir.join(component).join("conf");
        std::fs::create_dir_all(&conf).unwrap();
        std::fs::write(conf.join("config.yml"), "dirs:\n  output-dir: ../out\n").unwrap();
    }
    let entrypoint = dir.join(ENTRYPOINT);
    std::fs::write(&entrypoint, format!("#!/bin/bash\n{script_body}")).unwrap();
    ToolkitLayout {
        root: dir.to_path_buf(),
        entrypoint: ENTRYPOINT.to_string(),
        components: COMPONENTS.iter().map(|c| c.to_string()).collect(),
    }
}

/// Overrides for [`harness_with`].
#[derive(Default)]
pub struct Overrides {
    /// Parent of job workspaces (default: a fresh temp dir).
    pub work_root: Option<PathBuf>,
    /// Shared output area (default: `out/` in a fresh temp dir).
    pub output_dir: Option<PathBuf>,
    /// Worker slots (default: 2).
    pub max_concurrent_jobs: Option<usize>,
    /// Job ledger (default: in-memory).
    pub ledger: Option<Arc<dyn JobLedger>>,
}

pub fn harness(script_body: &str) -> Harness {
    harness_with(script_body, Overrides::default())
}

pub fn harness_with(script_body: &str, overrides: Overrides) -> Harness {
    let toolkit = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let shared = tempfile::tempdir().unwrap();
    let work_root = overrides
        .work_root
        .unwrap_or_else(|| work.path().to_path_buf());

    let config = PipelineConfig {
        toolkit: write_toolkit(toolkit.path(), script_body),
        work_root: work_root.clone(),
        output_dir: overrides
            .output_dir
            .unwrap_or_else(|| shared.path().join("out")),
        output_public_prefix: "out".to_string(),
        lock_ttl: Duration::from_secs(3600),
        max_concurrent_jobs: overrides.max_concurrent_jobs.unwrap_or(2),
        queue_capacity: 16,
    };
    let stores = Stores {
        locks: Arc::new(MemoryLockStore::new()),
        ledger: overrides
            .ledger
            .unwrap_or_else(|| Arc::new(MemoryJobLedger::new())),
    };
    let broadcaster = Arc::new(LogBroadcaster::default());
    let (service, dispatcher) = doculab_pipeline::build(&config, &stores, broadcaster.clone());

    let cancel = CancellationToken::new();
    let tracker = dispatcher.tracker();
    let handle = tokio::spawn(dispatcher.run(cancel.clone()));

    Harness {
        service: Arc::new(service),
        stores,
        broadcaster,
        cancel,
        dispatcher: handle,
        tracker,
        toolkit,
        work,
        shared,
        work_root,
    }
}

impl Harness {
    /// Poll until the job reaches a terminal state.
    pub async fn wait_terminal(&self, job_id: &JobId) -> JobRecord {
        for _ in 0..1000 {
            let record = self.service.get_state(job_id).await.expect("job exists");
            if record.state.is_terminal() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} did not finish in time");
    }

    /// Poll until the job is terminal and its key's lock is released.
    pub async fn wait_settled(&self, job_id: &JobId) -> JobRecord {
        let record = self.wait_terminal(job_id).await;
        let key = record.submission_key.as_str().to_string();
        for _ in 0..1000 {
            if self.lock_holder(&key).await != Some(*job_id) {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} kept its lock");
    }

    pub fn published_dir(&self) -> PathBuf {
        self.shared.path().join("out")
    }

    /// Names of entries under `dir`, sorted; empty if it does not exist.
    pub fn list(dir: &Path) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        names
    }

    pub async fn lock_holder(&self, key: &str) -> Option<JobId> {
        self.stores
            .locks
            .get(&format!("processing:{key}"))
            .await
            .unwrap()
    }
}
