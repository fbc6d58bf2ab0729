//! Output artifacts.
//!
//! - [`npz`] -- NumPy `.npz` dense-array bundles (writer and reader).
//! - [`records`] -- bounded per-timestep JSON documents.
//!
//! Both writers stage output in a `.partial` sibling and only rename it into
//! place once the artifact is complete, so a failed conversion never leaves a
//! truncated file under the final name.

pub mod npz;
pub mod records;

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Result, VaultError};

pub use npz::{NpzArchive, NpzWriter};

/// Extension of dense-array artifacts.
pub const NPZ_EXTENSION: &str = "npz";
/// Extension of bounded-record artifacts.
pub const JSON_EXTENSION: &str = "json";

/// Where an artifact landed and how big it is.
#[derive(Debug, Clone)]
pub struct ArtifactInfo {
    pub path: PathBuf,
    pub bytes: u64,
    /// Timesteps stored in the artifact.
    pub timesteps: usize,
}

/// A file staged under `<final>.partial`, removed on drop unless committed.
#[derive(Debug)]
pub struct PartialFile {
    staged: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl PartialFile {
    /// Create the staging file for `target`.
    pub fn create(target: &Path) -> Result<(Self, File)> {
        let mut staged = target.as_os_str().to_owned();
        staged.push(".partial");
        let staged = PathBuf::from(staged);
        let file = File::create(&staged).map_err(|e| VaultError::io(&staged, e))?;
        Ok((
            Self {
                staged,
                target: target.to_path_buf(),
                committed: false,
            },
            file,
        ))
    }

    /// Move the staged file to its final name.
    pub fn commit(mut self) -> Result<PathBuf> {
        std::fs::rename(&self.staged, &self.target).map_err(|e| VaultError::io(&self.target, e))?;
        self.committed = true;
        Ok(self.target.clone())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.staged) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.staged.display(), error = %e, "Failed to remove partial artifact");
            }
        }
    }
}

/// Size of a committed artifact on disk.
pub(crate) fn file_size(path: &Path) -> Result<u64> {
    std::fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| VaultError::io(path, e))
}
