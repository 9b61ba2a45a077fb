//! Filesystem helpers for model artifacts
//!
//! Compiled models may be a single file or a directory bundle, so every helper
//! here handles both.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A temporary artifact removed when the guard is dropped
///
/// Removal happens on every exit path of the owning scope, including early
/// returns through `?` and unwinding.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
}

impl TempArtifact {
    /// Take ownership of a path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Collision-free `temp_<uuid>.<extension>` path inside `dir`
    pub fn unique_in(dir: &Path, extension: &str) -> Self {
        Self::new(dir.join(format!("temp_{}.{}", Uuid::new_v4(), extension)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if let Err(e) = remove_artifact(&self.path) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove temporary artifact"
            );
        }
    }
}

/// Remove a file or directory; a missing path is not an error
pub fn remove_artifact(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Copy a file or directory tree to `destination`
pub fn copy_artifact(source: &Path, destination: &Path) -> io::Result<()> {
    let metadata = fs::metadata(source)?;

    if metadata.is_dir() {
        fs::create_dir_all(destination)?;
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            copy_artifact(&entry.path(), &destination.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        fs::copy(source, destination).map(|_| ())
    }
}
