use std::path::{Path, PathBuf};
use tempfile::TempDir;
use uuid::Uuid;

use crate::error::Result;

/// Private working directory for one job's intermediate media.
///
/// Every file handed out lives inside the arena's directory, so dropping
/// the arena removes all of them at once, whether the job succeeded or not.
#[derive(Debug)]
pub struct TempFileArena {
    dir: Option<TempDir>,
    files: Vec<PathBuf>,
    keep: bool,
}

impl TempFileArena {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("reelcut-job-").tempdir()?;
        tracing::debug!(dir = %dir.path().display(), "created job temp dir");
        Ok(Self {
            dir: Some(dir),
            files: Vec::new(),
            keep: false,
        })
    }

    /// Leave the directory on disk when the arena is dropped.
    pub fn keep_on_drop(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    pub fn dir(&self) -> &Path {
        self.dir
            .as_ref()
            .map(TempDir::path)
            .unwrap_or_else(|| Path::new(""))
    }

    /// Reserve a unique path such as `keyed-<uuid>.mov`. The file itself is
    /// created by whoever writes to it.
    pub fn allocate(&mut self, label: &str, extension: &str) -> PathBuf {
        let path = self
            .dir()
            .join(format!("{label}-{}.{extension}", Uuid::new_v4()));
        self.files.push(path.clone());
        path
    }

    /// Delete a file early, e.g. a rejected auto-tune candidate.
    pub fn discard(&mut self, path: &Path) {
        if let Some(pos) = self.files.iter().position(|p| p == path) {
            self.files.remove(pos);
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove temp file");
                }
            }
        }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

impl Drop for TempFileArena {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        if self.keep {
            let path = dir.keep();
            tracing::info!(dir = %path.display(), files = self.files.len(), "keeping temp files");
        } else {
            tracing::debug!(files = self.files.len(), "removing job temp files");
            drop(dir);
        }
    }
}
