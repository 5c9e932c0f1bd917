//! Script storage used by `file:` and `run:` commands.

use std::fs;
use std::path::{Path, PathBuf};

use brick_types::BrickError;

/// Named text blobs.
pub trait Storage: Send + Sync {
    /// # Errors
    ///
    /// Returns [`BrickError::Io`] when `path` cannot be read.
    fn read(&self, path: &str) -> Result<String, BrickError>;

    /// # Errors
    ///
    /// Returns [`BrickError::Io`] when `path` cannot be written.
    fn write(&self, path: &str, contents: &str) -> Result<(), BrickError>;
}

/// Files under a scripts directory.  Relative names resolve against the
/// root, absolute ones are used as given.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl Storage for FsStorage {
    fn read(&self, path: &str) -> Result<String, BrickError> {
        let full = self.resolve(path);
        fs::read_to_string(&full).map_err(|e| BrickError::io(full.display(), e))
    }

    fn write(&self, path: &str, contents: &str) -> Result<(), BrickError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| BrickError::io(parent.display(), e))?;
        }
        fs::write(&full, contents).map_err(|e| BrickError::io(full.display(), e))
    }
}
