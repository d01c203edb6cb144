use std::path::PathBuf;
use std::time::Duration;

/// Where the conversion toolkit lives and which parts of it a job needs.
#[derive(Debug, Clone)]
pub struct ToolkitLayout {
    /// Directory holding the toolkit components and entrypoint.
    pub root: PathBuf,
    /// Entrypoint file name, relative to `root`.
    pub entrypoint: String,
    /// Component directories copied into every workspace. Each must contain
    /// a `conf/config.yml`.
    pub components: Vec<String>,
}

impl Default for ToolkitLayout {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/app"),
            entrypoint: "all-formats-from-gsheet.sh".to_string(),
            components: vec![
                "gsheet-to-json".to_string(),
                "json-to-odt".to_string(),
                "json-to-docx".to_string(),
            ],
        }
    }
}

/// Settings for the job pipeline, resolved by the binary at startup.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub toolkit: ToolkitLayout,
    /// Parent directory of the per-job workspaces.
    pub work_root: PathBuf,
    /// Shared output area artifacts are published into.
    pub output_dir: PathBuf,
    /// Prefix of the paths recorded in result manifests.
    pub output_public_prefix: String,
    /// How long a submission key stays claimed if the job never releases it.
    pub lock_ttl: Duration,
    pub max_concurrent_jobs: usize,
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            toolkit: ToolkitLayout::default(),
            work_root: PathBuf::from("/app"),
            output_dir: PathBuf::from("out"),
            output_public_prefix: "out".to_string(),
            lock_ttl: Duration::from_secs(3600),
            max_concurrent_jobs: 4,
            queue_capacity: 256,
        }
    }
}
