//! Per-job execution workspaces.
//!
//! A workspace is `{work_root}/work_{job_id}` holding a private copy of the
//! toolkit components, each with its config rendered to point at the
//! workspace's own `out/` directory, plus an executable copy of the
//! entrypoint. Nothing in a workspace is shared with another job.
//!
//! [`Workspace`] is a guard: call [`Workspace::destroy`] on the normal path,
//! and if the owning task unwinds first the tree is removed on drop.

use std::io;
use std::path::{Path, PathBuf};

use doculab_core::toolkit::{render_config, RenderError, COMPONENT_CONFIG_PATH};
use doculab_core::types::JobId;

use crate::config::ToolkitLayout;

/// Prefix of workspace directory names.
pub const WORKSPACE_DIR_PREFIX: &str = "work_";

/// Private output subdirectory inside a workspace.
pub const PRIVATE_OUTPUT_DIR: &str = "out";

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot render {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: RenderError,
    },

    #[error("workspace preparation aborted: {0}")]
    Aborted(String),
}

impl WorkspaceError {
    fn io(action: &'static str, path: &Path) -> impl FnOnce(io::Error) -> Self {
        let path = path.to_path_buf();
        move |source| Self::Io {
            action,
            path,
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Creates job workspaces from the toolkit template.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    toolkit: ToolkitLayout,
    work_root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(toolkit: ToolkitLayout, work_root: impl Into<PathBuf>) -> Self {
        Self {
            toolkit,
            work_root: work_root.into(),
        }
    }

    /// Directory a job's workspace lives in (whether or not it exists).
    pub fn workspace_path(&self, job_id: &JobId) -> PathBuf {
        self.work_root.join(format!("{WORKSPACE_DIR_PREFIX}{job_id}"))
    }

    /// Build a fresh workspace for `job_id`.
    ///
    /// On error nothing is left behind and no process should be launched.
    pub async fn prepare(&self, job_id: &JobId) -> Result<Workspace, WorkspaceError> {
        tokio::fs::create_dir_all(&self.work_root)
            .await
            .map_err(WorkspaceError::io("create", &self.work_root))?;
        let work_root = tokio::fs::canonicalize(&self.work_root)
            .await
            .map_err(WorkspaceError::io("resolve", &self.work_root))?;

        let root = work_root.join(format!("{WORKSPACE_DIR_PREFIX}{job_id}"));
        // `create_dir` rather than `create_dir_all`: an existing directory
        // means another run owns it.
        tokio::fs::create_dir(&root)
            .await
            .map_err(WorkspaceError::io("create", &root))?;

        let workspace = Workspace {
            job_id: *job_id,
            output_dir: root.join(PRIVATE_OUTPUT_DIR),
            entrypoint: root.join(&self.toolkit.entrypoint),
            root,
            destroyed: false,
        };

        let toolkit = self.toolkit.clone();
        let target = workspace.root.clone();
        let populated = tokio::task::spawn_blocking(move || populate(&toolkit, &target))
            .await
            .map_err(|e| WorkspaceError::Aborted(e.to_string()))
            .and_then(|result| result);

        if let Err(e) = populated {
            workspace.destroy().await;
            return Err(e);
        }

        tracing::debug!(job_id = %job_id, path = %workspace.root.display(), "Workspace prepared");
        Ok(workspace)
    }
}

/// Copy the toolkit into `root` and render every component config.
fn populate(toolkit: &ToolkitLayout, root: &Path) -> Result<(), WorkspaceError> {
    let output_dir = root.join(PRIVATE_OUTPUT_DIR);
    std::fs::create_dir(&output_dir).map_err(WorkspaceError::io("create", &output_dir))?;

    for component in &toolkit.components {
        let source = toolkit.root.join(component);
        let target = root.join(component);
        copy_tree(&source, &target)?;

        let config_path = target.join(COMPONENT_CONFIG_PATH);
        let template =
            std::fs::read_to_string(&config_path).map_err(WorkspaceError::io("read", &config_path))?;
        let rendered = render_config(&template, &output_dir).map_err(|source| WorkspaceError::Config {
            path: config_path.clone(),
            source,
        })?;
        // The copy may be a link back into the toolkit; replace it with a file.
        std::fs::remove_file(&config_path).map_err(WorkspaceError::io("replace", &config_path))?;
        std::fs::write(&config_path, rendered).map_err(WorkspaceError::io("write", &config_path))?;
    }

    let source = toolkit.root.join(&toolkit.entrypoint);
    let target = root.join(&toolkit.entrypoint);
    std::fs::copy(&source, &target).map_err(WorkspaceError::io("copy", &source))?;
    make_executable(&target)?;
    Ok(())
}

/// Recursively copy a directory. Symlinks are recreated as links, never
/// followed, so a link cycle cannot recurse.
fn copy_tree(source: &Path, target: &Path) -> Result<(), WorkspaceError> {
    std::fs::create_dir_all(target).map_err(WorkspaceError::io("create", target))?;
    let entries = std::fs::read_dir(source).map_err(WorkspaceError::io("read", source))?;
    for entry in entries {
        let entry = entry.map_err(WorkspaceError::io("read", source))?;
        let from = entry.path();
        let to = target.join(entry.file_name());
        let file_type = entry.file_type().map_err(WorkspaceError::io("stat", &from))?;
        if file_type.is_symlink() {
            copy_link(&from, &to)?;
        } else if file_type.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            std::fs::copy(&from, &to).map_err(WorkspaceError::io("copy", &from))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_link(from: &Path, to: &Path) -> Result<(), WorkspaceError> {
    let link = std::fs::read_link(from).map_err(WorkspaceError::io("read link", from))?;
    std::os::unix::fs::symlink(&link, to).map_err(WorkspaceError::io("link", to))
}

#[cfg(not(unix))]
fn copy_link(from: &Path, _to: &Path) -> Result<(), WorkspaceError> {
    tracing::warn!(path = %from.display(), "Skipping symlink in toolkit");
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), WorkspaceError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(WorkspaceError::io("chmod", path))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), WorkspaceError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Workspace guard
// ---------------------------------------------------------------------------

/// Handle to one job's workspace tree.
#[derive(Debug)]
pub struct Workspace {
    job_id: JobId,
    root: PathBuf,
    output_dir: PathBuf,
    entrypoint: PathBuf,
    destroyed: bool,
}

impl Workspace {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Workspace root; the conversion process runs here.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Private output directory the toolkit writes into.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Absolute path of the executable entrypoint copy.
    pub fn entrypoint(&self) -> &Path {
        &self.entrypoint
    }

    /// Remove the whole tree. Never fails; errors are logged.
    pub async fn destroy(mut self) {
        self.destroyed = true;
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {
                tracing::debug!(job_id = %self.job_id, path = %self.root.display(), "Workspace removed");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    job_id = %self.job_id,
                    path = %self.root.display(),
                    error = %e,
                    "Failed to remove workspace",
                );
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => {
                tracing::warn!(job_id = %self.job_id, path = %self.root.display(), "Workspace removed on drop");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    job_id = %self.job_id,
                    path = %self.root.display(),
                    error = %e,
                    "Failed to remove workspace on drop",
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
