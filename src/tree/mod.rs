//! Build tree management
//!
//! The build tree is the five staging directories rpmbuild reads and
//! writes. Their locations come from macro expansion; this module makes
//! sure they exist and can empty one of them before a build.
//!
//! The tree is process-wide state and is never deleted here.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rpmtool_rpm::{MacroError, MacroExpander};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Mode for directories created by [`BuildTree::ensure`]
#[cfg(unix)]
const TREE_DIR_MODE: u32 = 0o700;

/// Tree errors
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("build tree is corrupt: {role} path {path} exists but is not a directory")]
    Corrupt { role: TreeRole, path: PathBuf },

    #[error("build tree {role} path {path} is not absolute")]
    NotAbsolute { role: TreeRole, path: PathBuf },

    #[error("unable to resolve {role} directory: {source}")]
    Resolve {
        role: TreeRole,
        #[source]
        source: MacroError,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The five directory roles of a build tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeRole {
    /// Build work area (`%{_builddir}`)
    Build,
    /// Binary package output (`%{_rpmdir}`)
    Rpm,
    /// Sources (`%{_sourcedir}`)
    Source,
    /// Specs (`%{_specdir}`)
    Spec,
    /// Source package output (`%{_srcrpmdir}`)
    Srpm,
}

impl TreeRole {
    pub const ALL: [TreeRole; 5] = [
        TreeRole::Build,
        TreeRole::Rpm,
        TreeRole::Source,
        TreeRole::Spec,
        TreeRole::Srpm,
    ];

    /// Macro whose expansion locates this role
    pub fn macro_expression(self) -> &'static str {
        match self {
            TreeRole::Build => "%{_builddir}",
            TreeRole::Rpm => "%{_rpmdir}",
            TreeRole::Source => "%{_sourcedir}",
            TreeRole::Spec => "%{_specdir}",
            TreeRole::Srpm => "%{_srcrpmdir}",
        }
    }

    fn default_dir_name(self) -> &'static str {
        match self {
            TreeRole::Build => "BUILD",
            TreeRole::Rpm => "RPMS",
            TreeRole::Source => "SOURCES",
            TreeRole::Spec => "SPECS",
            TreeRole::Srpm => "SRPMS",
        }
    }
}

impl fmt::Display for TreeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TreeRole::Build => "build",
            TreeRole::Rpm => "rpm",
            TreeRole::Source => "source",
            TreeRole::Spec => "spec",
            TreeRole::Srpm => "srpm",
        };
        f.pad(name)
    }
}

/// Resolved build tree paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTree {
    pub build_dir: PathBuf,
    pub rpm_dir: PathBuf,
    pub source_dir: PathBuf,
    pub spec_dir: PathBuf,
    pub srpm_dir: PathBuf,
}

impl BuildTree {
    /// Resolve every role through the builder's macro configuration.
    pub fn from_macros(macros: &dyn MacroExpander) -> Result<Self, TreeError> {
        let resolve = |role: TreeRole| -> Result<PathBuf, TreeError> {
            let value = macros
                .expand(role.macro_expression())
                .map_err(|source| TreeError::Resolve { role, source })?;
            let path = PathBuf::from(value);
            if !path.is_absolute() {
                return Err(TreeError::NotAbsolute { role, path });
            }
            Ok(path)
        };

        Ok(Self {
            build_dir: resolve(TreeRole::Build)?,
            rpm_dir: resolve(TreeRole::Rpm)?,
            source_dir: resolve(TreeRole::Source)?,
            spec_dir: resolve(TreeRole::Spec)?,
            srpm_dir: resolve(TreeRole::Srpm)?,
        })
    }

    /// The conventional `rpmdev-setuptree` layout under `top`.
    pub fn rooted_at(top: &Path) -> Self {
        Self {
            build_dir: top.join(TreeRole::Build.default_dir_name()),
            rpm_dir: top.join(TreeRole::Rpm.default_dir_name()),
            source_dir: top.join(TreeRole::Source.default_dir_name()),
            spec_dir: top.join(TreeRole::Spec.default_dir_name()),
            srpm_dir: top.join(TreeRole::Srpm.default_dir_name()),
        }
    }

    pub fn path(&self, role: TreeRole) -> &Path {
        match role {
            TreeRole::Build => &self.build_dir,
            TreeRole::Rpm => &self.rpm_dir,
            TreeRole::Source => &self.source_dir,
            TreeRole::Spec => &self.spec_dir,
            TreeRole::Srpm => &self.srpm_dir,
        }
    }

    /// Create any missing role directory.
    ///
    /// Every role is inspected before anything is created, so a corrupt
    /// tree fails without touching the healthy roles. Idempotent.
    pub fn ensure(&self) -> Result<(), TreeError> {
        let mut missing = Vec::new();

        for role in TreeRole::ALL {
            let path = self.path(role);
            if !path.is_absolute() {
                return Err(TreeError::NotAbsolute {
                    role,
                    path: path.to_path_buf(),
                });
            }
            match fs::metadata(path) {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => {
                    return Err(TreeError::Corrupt {
                        role,
                        path: path.to_path_buf(),
                    })
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => missing.push(role),
                Err(source) => {
                    return Err(TreeError::Io {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            }
        }

        for role in missing {
            let path = self.path(role);
            create_tree_dir(path).map_err(|source| TreeError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            info!(role = %role, path = %path.display(), "created build tree directory");
        }

        Ok(())
    }

    /// Remove everything under a role's directory, keeping the directory.
    ///
    /// Not transactional: a failure part way through leaves the entries
    /// already removed gone.
    pub fn clean(&self, role: TreeRole) -> Result<usize, TreeError> {
        let dir = self.path(role);
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| TreeError::Io { path, source }
        };

        let mut removed = 0;
        for entry in fs::read_dir(dir).map_err(io_err(dir))? {
            let entry = entry.map_err(io_err(dir))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(io_err(&path))?;

            if file_type.is_dir() {
                fs::remove_dir_all(&path).map_err(io_err(&path))?;
            } else {
                fs::remove_file(&path).map_err(io_err(&path))?;
            }
            removed += 1;
        }

        debug!(role = %role, path = %dir.display(), removed, "cleaned build tree directory");
        Ok(removed)
    }
}

#[cfg(unix)]
fn create_tree_dir(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    fs::DirBuilder::new()
        .recursive(true)
        .mode(TREE_DIR_MODE)
        .create(path)
}

#[cfg(not(unix))]
fn create_tree_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}
