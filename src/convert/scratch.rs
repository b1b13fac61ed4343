//! Per-file scratch directory for temporary artifacts.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::HarvestResult;

/// Owns a temporary directory holding a file's converted partitions and plot.
///
/// The directory is removed by [`ScratchSpace::release`] or, failing that, on drop. Removal
/// failures caused by permissions are logged and otherwise ignored.
#[derive(Debug)]
pub struct ScratchSpace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl ScratchSpace {
    /// Create a fresh directory under `root` (the system temp dir when `None`).
    pub fn create(root: Option<&Path>) -> HarvestResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("harvest-");
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(Self {
            path: dir.path().to_path_buf(),
            dir: Some(dir),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the directory and everything in it.
    pub fn release(mut self) -> HarvestResult<()> {
        match self.dir.take() {
            Some(dir) => remove(dir),
            None => Ok(()),
        }
    }
}

fn remove(dir: TempDir) -> HarvestResult<()> {
    let path = dir.path().to_path_buf();
    match dir.close() {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "removed scratch directory");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            tracing::warn!(path = %path.display(), error = %e, "could not remove scratch directory");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

impl Drop for ScratchSpace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = remove(dir) {
                tracing::warn!(path = %self.path.display(), error = %e, "could not remove scratch directory");
            }
        }
    }
}
