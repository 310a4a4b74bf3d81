//! Remote source downloads

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::FetchConfig;

/// Prefix for in-progress downloads inside the source directory
const PARTIAL_PREFIX: &str = ".rpmtool-download-";

/// Download errors
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server answered {status}")]
    Status { status: String },

    #[error("destination {0} is a directory")]
    DestinationIsDirectory(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Downloads one URL to one file
pub trait Fetcher {
    /// Download `url` into `destination`, returning the byte count.
    ///
    /// On error nothing is left at `destination`.
    fn fetch(&self, url: &Url, destination: &Path) -> Result<u64, FetchError>;
}

/// Blocking HTTP/HTTPS fetcher
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &Url, destination: &Path) -> Result<u64, FetchError> {
        let mut response = self.client.get(url.clone()).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.to_string(),
            });
        }

        let parent = destination.parent().unwrap_or_else(|| Path::new("."));
        let io_err = |source| FetchError::Io {
            path: destination.to_path_buf(),
            source,
        };

        // Stream into a sibling temp file; it is deleted on drop unless persisted.
        let mut partial = tempfile::Builder::new()
            .prefix(PARTIAL_PREFIX)
            .tempfile_in(parent)
            .map_err(io_err)?;
        let bytes = io::copy(&mut response, partial.as_file_mut()).map_err(io_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            partial
                .as_file()
                .set_permissions(fs::Permissions::from_mode(0o644))
                .map_err(io_err)?;
        }

        partial
            .persist(destination)
            .map_err(|e| io_err(e.error))?;

        debug!(url = %url, destination = %destination.display(), bytes, "downloaded");
        Ok(bytes)
    }
}

/// True when `destination` already holds a download (directories excluded).
pub(crate) fn existing_download(destination: &Path) -> Result<bool, FetchError> {
    match fs::metadata(destination) {
        Ok(meta) if meta.is_dir() => Err(FetchError::DestinationIsDirectory(
            destination.to_path_buf(),
        )),
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(FetchError::Io {
            path: destination.to_path_buf(),
            source,
        }),
    }
}
