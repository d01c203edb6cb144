//! Copies produced artifacts from a workspace into the shared output area.

use std::io;
use std::path::{Path, PathBuf};

use doculab_core::artifacts::{ArtifactKind, ResultManifest};
use doculab_core::submission::SubmissionKey;
use doculab_core::types::JobId;

use crate::workspace::Workspace;

/// An artifact that exists could not be copied out.
#[derive(Debug, thiserror::Error)]
#[error("{file}: {source}")]
pub struct PublishError {
    pub file: String,
    #[source]
    pub source: io::Error,
}

/// Publishes artifacts under `{output_dir}/{key}{extension}`.
///
/// The output area is flat: a later job for the same key overwrites the
/// files of an earlier one. Each file is written to a temporary name first
/// and renamed into place, so readers never see a half-copied artifact.
#[derive(Debug, Clone)]
pub struct ArtifactPublisher {
    output_dir: PathBuf,
    public_prefix: String,
}

impl ArtifactPublisher {
    pub fn new(output_dir: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            public_prefix: public_prefix.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Copy every `expected` artifact present in the workspace and return
    /// the manifest of what was published.
    ///
    /// Missing files are skipped with a warning.
    pub async fn publish(
        &self,
        key: &SubmissionKey,
        workspace: &Workspace,
        expected: &[ArtifactKind],
    ) -> Result<ResultManifest, PublishError> {
        let job_id = workspace.job_id();
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| PublishError {
                file: self.output_dir.display().to_string(),
                source,
            })?;

        let mut manifest = ResultManifest::new();
        for &kind in expected {
            let file = kind.file_name(key);
            let source = workspace.output_dir().join(&file);

            match tokio::fs::metadata(&source).await {
                Ok(meta) if meta.is_file() => {}
                Ok(_) | Err(_) => {
                    tracing::warn!(
                        job_id = %job_id,
                        submission_key = %key,
                        artifact = %kind,
                        path = %source.display(),
                        "Expected artifact not produced, skipping",
                    );
                    continue;
                }
            }

            self.copy_into_place(&source, &file, job_id)
                .await
                .map_err(|source| PublishError {
                    file: file.clone(),
                    source,
                })?;

            tracing::info!(job_id = %job_id, artifact = %kind, file = %file, "Artifact published");
            manifest.insert(kind, self.public_path(&file));
        }
        Ok(manifest)
    }

    /// Manifest value for a published file name.
    pub fn public_path(&self, file: &str) -> String {
        let prefix = self.public_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            file.to_string()
        } else {
            format!("{prefix}/{file}")
        }
    }

    async fn copy_into_place(
        &self,
        source: &Path,
        file: &str,
        job_id: &JobId,
    ) -> io::Result<()> {
        let partial = self.output_dir.join(format!(".{file}.{job_id}.partial"));
        let target = self.output_dir.join(file);
        if let Err(e) = tokio::fs::copy(source, &partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&partial, &target).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
