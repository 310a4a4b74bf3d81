//! Artifact discovery
//!
//! After a build the output directory is walked for package files. The
//! walk is sorted by file name so the order is stable for an unchanged
//! directory; nothing else about the order is promised.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Suffix of a package file
pub const PACKAGE_SUFFIX: &str = ".rpm";

/// Scan errors
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("unable to scan {root}: {source}")]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("unable to read artifact {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Finds package files under an output directory
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactCollector;

impl ArtifactCollector {
    /// Every regular file under `dir` whose name ends in `.rpm`.
    ///
    /// The root and directory entries are skipped. Any walk failure aborts
    /// the listing.
    pub fn list(&self, dir: &Path) -> Result<Vec<PathBuf>, ScanError> {
        let mut found = Vec::new();

        for entry in WalkDir::new(dir)
            .follow_links(false)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        {
            let entry = entry.map_err(|source| ScanError::Walk {
                root: dir.to_path_buf(),
                source,
            })?;

            if entry.depth() == 0 || !entry.file_type().is_file() {
                continue;
            }
            if entry
                .file_name()
                .to_string_lossy()
                .ends_with(PACKAGE_SUFFIX)
            {
                found.push(entry.into_path());
            }
        }

        debug!(dir = %dir.display(), count = found.len(), "artifact scan complete");
        Ok(found)
    }
}

/// A discovered package with its size and digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
}

impl Artifact {
    pub fn describe(path: &Path) -> Result<Self, ScanError> {
        let read_err = |source| ScanError::Read {
            path: path.to_path_buf(),
            source,
        };

        let mut file = File::open(path).map_err(read_err)?;
        let mut hasher = Sha256::new();
        let size = io::copy(&mut file, &mut hasher).map_err(read_err)?;

        Ok(Self {
            path: path.to_path_buf(),
            size,
            sha256: hex::encode(hasher.finalize()),
        })
    }
}
