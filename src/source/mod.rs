//! Source resolution and acquisition
//!
//! Resolution asks the spec parser which sources a spec declares.
//! Acquisition puts each of them into the tree's source directory:
//! - bare paths are copied from next to the spec (always overwritten)
//! - `http`/`https` URLs are downloaded once; an existing file wins
//! - anything else aborts the batch
//!
//! Sources are handled strictly in declaration order and the first failure
//! stops the batch.

mod fetch;

pub use fetch::{FetchError, Fetcher, HttpFetcher};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rpmtool_rpm::{DeclaredSource, SpecError, SpecParser};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

/// Source acquisition errors
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("unsupported source scheme {scheme:?} for {origin}")]
    UnsupportedScheme { scheme: String, origin: String },

    #[error("invalid source origin {origin}: {message}")]
    InvalidOrigin { origin: String, message: String },

    #[error("invalid source file name {0:?}")]
    InvalidFileName(String),

    #[error("unable to fetch source. destination={} source={url}: {source}", .destination.display())]
    FetchFailed {
        destination: PathBuf,
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("unable to copy source. destination={} source={}: {source}", .destination.display(), .origin.display())]
    CopyFailed {
        destination: PathBuf,
        origin: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// How a source ended up in the source directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum Acquisition {
    Copied { bytes: u64 },
    /// Origin and destination are the same file
    InPlace,
    Fetched { bytes: u64 },
    /// A file of that name was already present
    Skipped,
}

/// Outcome for one declared source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquiredSource {
    pub file_name: String,
    pub origin: String,
    pub destination: PathBuf,
    #[serde(flatten)]
    pub acquisition: Acquisition,
}

/// How an origin string is interpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOrigin {
    /// Path relative to the spec's directory
    Local(PathBuf),
    Remote(Url),
}

impl SourceOrigin {
    /// Classify an origin by its URI scheme.
    pub fn classify(origin: &str) -> Result<Self, SourceError> {
        match Url::parse(origin) {
            Ok(url) => match url.scheme() {
                "http" | "https" => Ok(SourceOrigin::Remote(url)),
                scheme => Err(SourceError::UnsupportedScheme {
                    scheme: scheme.to_string(),
                    origin: origin.to_string(),
                }),
            },
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Ok(SourceOrigin::Local(PathBuf::from(origin)))
            }
            Err(e) => Err(SourceError::InvalidOrigin {
                origin: origin.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// Enumerates the sources a spec declares
pub struct SpecSourceResolver<'a> {
    parser: &'a dyn SpecParser,
}

impl<'a> SpecSourceResolver<'a> {
    pub fn new(parser: &'a dyn SpecParser) -> Self {
        Self { parser }
    }

    /// Open the spec, read its sources, close it.
    ///
    /// The handle is closed before any result, success or error, is
    /// returned.
    pub fn resolve(&self, spec_path: &Path) -> Result<Vec<DeclaredSource>, SpecError> {
        let mut handle = self.parser.open(spec_path)?;
        let sources = handle.sources();
        handle.close();

        let sources = sources?;
        debug!(spec = %spec_path.display(), count = sources.len(), "resolved sources");
        Ok(sources)
    }
}

/// Puts declared sources into the source directory
pub struct SourceAcquirer<'a> {
    source_dir: PathBuf,
    fetcher: &'a dyn Fetcher,
}

impl<'a> SourceAcquirer<'a> {
    pub fn new(source_dir: impl Into<PathBuf>, fetcher: &'a dyn Fetcher) -> Self {
        Self {
            source_dir: source_dir.into(),
            fetcher,
        }
    }

    /// Acquire every source in order, stopping at the first failure.
    pub fn acquire_all(
        &self,
        spec_path: &Path,
        sources: &[DeclaredSource],
    ) -> Result<Vec<AcquiredSource>, SourceError> {
        let spec_dir = spec_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        sources
            .iter()
            .map(|source| self.acquire(spec_dir, source))
            .collect()
    }

    /// Acquire one source.
    pub fn acquire(
        &self,
        spec_dir: &Path,
        source: &DeclaredSource,
    ) -> Result<AcquiredSource, SourceError> {
        let destination = self.destination_for(&source.file_name)?;

        let acquisition = match SourceOrigin::classify(&source.origin_path)? {
            SourceOrigin::Local(relative) => {
                copy_source(&spec_dir.join(relative), &destination)?
            }
            SourceOrigin::Remote(url) => self.fetch_source(&url, &destination)?,
        };

        Ok(AcquiredSource {
            file_name: source.file_name.clone(),
            origin: source.origin_path.clone(),
            destination,
            acquisition,
        })
    }

    fn destination_for(&self, file_name: &str) -> Result<PathBuf, SourceError> {
        let plain = !file_name.is_empty()
            && file_name != "."
            && file_name != ".."
            && !file_name.contains('/')
            && !file_name.contains('\\');
        if !plain {
            return Err(SourceError::InvalidFileName(file_name.to_string()));
        }
        Ok(self.source_dir.join(file_name))
    }

    fn fetch_source(&self, url: &Url, destination: &Path) -> Result<Acquisition, SourceError> {
        let failed = |source| SourceError::FetchFailed {
            destination: destination.to_path_buf(),
            url: url.to_string(),
            source,
        };

        if fetch::existing_download(destination).map_err(failed)? {
            info!(
                "Download skipped. File already exists. path={}",
                destination.display()
            );
            return Ok(Acquisition::Skipped);
        }

        info!("Downloading {} to {}", url, destination.display());
        let bytes = self.fetcher.fetch(url, destination).map_err(failed)?;
        Ok(Acquisition::Fetched { bytes })
    }
}

fn copy_source(origin: &Path, destination: &Path) -> Result<Acquisition, SourceError> {
    let failed = |source| SourceError::CopyFailed {
        destination: destination.to_path_buf(),
        origin: origin.to_path_buf(),
        source,
    };

    if same_file(origin, destination) {
        debug!(path = %destination.display(), "source already in place");
        return Ok(Acquisition::InPlace);
    }

    info!("Copying {} to {}", origin.display(), destination.display());
    let bytes = fs::copy(origin, destination).map_err(failed)?;
    Ok(Acquisition::Copied { bytes })
}

/// Copying a file onto itself would truncate it.
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
