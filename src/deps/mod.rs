//! Build dependency installation
//!
//! Delegates to `dnf builddep`. The command is prefixed with `sudo` when the
//! effective user is not root, and `--refresh` is added when the caller
//! wants the latest metadata. Output goes straight to the terminal.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::config::ToolsConfig;
use crate::process::{Invocation, ProcessError};
use crate::tools::find_executable;

/// Dependency installation errors
#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("{0} not found on PATH")]
    NotFound(String),

    #[error("unable to inspect {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("build dependency installation failed: {0}")]
    Failed(#[source] ProcessError),
}

/// Installs the build dependencies of a spec
pub trait DependencyManager {
    fn install(&self, spec_path: &Path, latest: bool) -> Result<(), DependencyError>;
}

/// dnf generation, which changes the `builddep` syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnfFlavor {
    /// `dnf builddep --spec <spec>`
    Dnf4,
    /// `dnf builddep <spec>`
    Dnf5,
}

/// `dnf builddep` front end
#[derive(Debug, Clone)]
pub struct DnfBuildDep {
    dnf: String,
    sudo: String,
    privileged: bool,
    flavor: Option<DnfFlavor>,
}

impl DnfBuildDep {
    /// Privilege from the effective uid; flavor detected on first install.
    pub fn from_tools(tools: &ToolsConfig) -> Self {
        Self {
            dnf: tools.dnf.clone(),
            sudo: tools.sudo.clone(),
            privileged: is_privileged(),
            flavor: None,
        }
    }

    pub fn new(
        dnf: impl Into<String>,
        sudo: impl Into<String>,
        privileged: bool,
        flavor: DnfFlavor,
    ) -> Self {
        Self {
            dnf: dnf.into(),
            sudo: sudo.into(),
            privileged,
            flavor: Some(flavor),
        }
    }

    pub fn invocation(&self, flavor: DnfFlavor, spec_path: &Path, latest: bool) -> Invocation {
        let mut inv = Invocation::new(&self.dnf).args(["builddep", "--assumeyes"]);
        if flavor == DnfFlavor::Dnf4 {
            inv = inv.arg("--spec");
        }
        inv = inv.arg(spec_path);

        if latest {
            inv = inv.arg("--refresh");
        }
        if !self.privileged {
            inv = inv.wrapped_with(&self.sudo);
        }
        inv
    }
}

impl DependencyManager for DnfBuildDep {
    fn install(&self, spec_path: &Path, latest: bool) -> Result<(), DependencyError> {
        let flavor = match self.flavor {
            Some(flavor) => flavor,
            None => detect_flavor(&self.dnf)?,
        };
        debug!(?flavor, privileged = self.privileged, "installing build dependencies");

        let inv = self.invocation(flavor, spec_path, latest);
        info!("Installing build dependencies: {}", inv);
        inv.run_inherited().map_err(DependencyError::Failed)
    }
}

/// dnf5 installs `dnf` as a symlink to `dnf5`.
pub fn detect_flavor(dnf: &str) -> Result<DnfFlavor, DependencyError> {
    let path =
        find_executable(dnf).ok_or_else(|| DependencyError::NotFound(dnf.to_string()))?;
    flavor_of(&path)
}

fn flavor_of(path: &Path) -> Result<DnfFlavor, DependencyError> {
    let io_err = |source| DependencyError::Io {
        path: path.to_path_buf(),
        source,
    };

    let meta = fs::symlink_metadata(path).map_err(io_err)?;
    if !meta.file_type().is_symlink() {
        return Ok(DnfFlavor::Dnf4);
    }

    let target = fs::read_link(path).map_err(io_err)?;
    if target.to_string_lossy().ends_with("dnf5") {
        Ok(DnfFlavor::Dnf5)
    } else {
        Ok(DnfFlavor::Dnf4)
    }
}

#[cfg(unix)]
pub fn is_privileged() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
pub fn is_privileged() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_dnf4_unprivileged() {
        let dnf = DnfBuildDep::new("dnf", "sudo", false, DnfFlavor::Dnf4);
        let inv = dnf.invocation(DnfFlavor::Dnf4, Path::new("/work/hello.spec"), false);

        assert_eq!(inv.program(), "sudo");
        assert_eq!(
            inv.args_lossy(),
            vec!["dnf", "builddep", "--assumeyes", "--spec", "/work/hello.spec"]
        );
    }

    #[test]
    fn test_dnf5_privileged_latest() {
        let dnf = DnfBuildDep::new("dnf", "sudo", true, DnfFlavor::Dnf5);
        let inv = dnf.invocation(DnfFlavor::Dnf5, Path::new("hello.spec"), true);

        assert_eq!(inv.program(), "dnf");
        assert_eq!(
            inv.args_lossy(),
            vec!["builddep", "--assumeyes", "hello.spec", "--refresh"]
        );
    }

    #[test]
    fn test_refresh_stays_inside_sudo() {
        let dnf = DnfBuildDep::new("/usr/bin/dnf", "doas", false, DnfFlavor::Dnf4);
        let inv = dnf.invocation(DnfFlavor::Dnf4, Path::new("a.spec"), true);

        assert_eq!(inv.program(), "doas");
        let args = inv.args_lossy();
        assert_eq!(args.first().map(String::as_str), Some("/usr/bin/dnf"));
        assert_eq!(args.last().map(String::as_str), Some("--refresh"));
    }

    #[test]
    fn test_flavor_of_plain_file() {
        let dir = TempDir::new().unwrap();
        let dnf = dir.path().join("dnf");
        fs::write(&dnf, "#!/bin/sh\n").unwrap();
        assert_eq!(flavor_of(&dnf).unwrap(), DnfFlavor::Dnf4);
    }

    #[cfg(unix)]
    #[test]
    fn test_flavor_of_dnf5_symlink() {
        let dir = TempDir::new().unwrap();
        let dnf5 = dir.path().join("dnf5");
        fs::write(&dnf5, "#!/bin/sh\n").unwrap();
        let dnf = dir.path().join("dnf");
        std::os::unix::fs::symlink(&dnf5, &dnf).unwrap();

        assert_eq!(flavor_of(&dnf).unwrap(), DnfFlavor::Dnf5);
    }

    #[cfg(unix)]
    #[test]
    fn test_flavor_of_other_symlink() {
        let dir = TempDir::new().unwrap();
        let dnf3 = dir.path().join("dnf-3");
        fs::write(&dnf3, "#!/bin/sh\n").unwrap();
        let dnf = dir.path().join("dnf");
        std::os::unix::fs::symlink(&dnf3, &dnf).unwrap();

        assert_eq!(flavor_of(&dnf).unwrap(), DnfFlavor::Dnf4);
    }

    #[test]
    fn test_detect_missing_dnf() {
        let err = detect_flavor("rpmtool-no-such-dnf").unwrap_err();
        assert!(matches!(err, DependencyError::NotFound(_)));
    }
}
