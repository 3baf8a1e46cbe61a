//! Writes rendered test files below an output directory.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::domain::errors::{DomainError, DomainResult};
use crate::services::source_renderer::SourceRenderer;
use crate::services::suite_packer::TestFile;

/// Writes rendered test files below a root directory.
pub struct SuiteWriter {
    root: PathBuf,
    renderer: SourceRenderer,
}

impl SuiteWriter {
    /// Writer rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            renderer: SourceRenderer::new(),
        }
    }

    /// Directory files are written below.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Render and write every file. Returns the written paths.
    pub async fn write_all(&self, files: &[TestFile]) -> DomainResult<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(files.len());
        for file in files {
            let source = self.renderer.render(file)?;
            let path = self.root.join(file.relative_path());
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| DomainError::Io(format!("{}: {e}", parent.display())))?;
            }
            tokio::fs::write(&path, source)
                .await
                .map_err(|e| DomainError::Io(format!("{}: {e}", path.display())))?;
            written.push(path);
        }
        info!(files = written.len(), dir = %self.root.display(), "test sources written");
        Ok(written)
    }
}
