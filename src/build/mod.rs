//! Package build invocation
//!
//! `rpmbuild` does the actual work; this module only picks the build-type
//! flag and reports failure. Why a build failed is in rpmbuild's own output,
//! which is streamed to the terminal.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::process::{Invocation, ProcessError};
use crate::tree::TreeRole;

/// Build errors
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{mode} build of {spec} failed: {source}")]
    Failed {
        spec: String,
        mode: BuildMode,
        #[source]
        source: ProcessError,
    },
}

/// What to produce from a spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    /// Binary and source packages
    #[default]
    Rpm,
    /// Source package only
    Srpm,
}

impl BuildMode {
    /// rpmbuild build-type flag
    pub fn flag(self) -> &'static str {
        match self {
            BuildMode::Rpm => "-ba",
            BuildMode::Srpm => "-bs",
        }
    }

    /// Tree role that receives this mode's packages.
    ///
    /// This is the role cleaned before the build and scanned after it.
    pub fn output_role(self) -> TreeRole {
        match self {
            BuildMode::Rpm => TreeRole::Rpm,
            BuildMode::Srpm => TreeRole::Srpm,
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildMode::Rpm => f.write_str("rpm"),
            BuildMode::Srpm => f.write_str("srpm"),
        }
    }
}

/// Produces packages from a spec
pub trait Builder {
    fn build(&self, spec_path: &Path, mode: BuildMode) -> Result<(), BuildError>;
}

/// `rpmbuild` front end
#[derive(Debug, Clone)]
pub struct RpmBuild {
    program: String,
}

impl RpmBuild {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn invocation(&self, spec_path: &Path, mode: BuildMode) -> Invocation {
        Invocation::new(&self.program)
            .arg(mode.flag())
            .arg(spec_path)
    }
}

impl Default for RpmBuild {
    fn default() -> Self {
        Self::new("rpmbuild")
    }
}

impl Builder for RpmBuild {
    fn build(&self, spec_path: &Path, mode: BuildMode) -> Result<(), BuildError> {
        let inv = self.invocation(spec_path, mode);
        info!("Building: {}", inv);
        inv.run_inherited().map_err(|source| BuildError::Failed {
            spec: spec_path.display().to_string(),
            mode,
            source,
        })
    }
}
