//! Build-and-sign pipeline
//!
//! One run, in order:
//! - Ensure the build tree
//! - Resolve the spec's declared sources
//! - Acquire them into the source directory
//! - Install build dependencies (binary builds only, optional)
//! - Clean the output directory
//! - Build
//! - List the produced packages
//! - Sign them when a usable key was supplied
//!
//! Every stage fails fast. The only thing that outlives a failure is
//! keyring teardown inside the signing step.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rpmtool_rpm::{RpmSpecParser, SpecError, SpecParser};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::artifact::{Artifact, ArtifactCollector, ScanError};
use crate::build::{BuildError, BuildMode, Builder, RpmBuild};
use crate::config::{Config, ConfigError};
use crate::context::BuildContext;
use crate::deps::{DependencyError, DependencyManager, DnfBuildDep};
use crate::signing::{
    GnuPg, KeyringTool, PackageSigner, RpmSign, SigningError, SigningKey, SigningOrchestrator,
    SigningOutcome,
};
use crate::source::{
    AcquiredSource, FetchError, Fetcher, HttpFetcher, SourceAcquirer, SourceError,
    SpecSourceResolver,
};
use crate::tools::MissingTools;
use crate::tree::TreeError;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("unable to create HTTP client: {0}")]
    HttpClient(#[source] FetchError),

    #[error("{0}")]
    Tools(#[from] MissingTools),

    #[error("build tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("spec error: {0}")]
    Spec(#[from] SpecError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("dependency error: {0}")]
    Dependencies(#[from] DependencyError),

    #[error("build error: {0}")]
    Build(#[from] BuildError),

    #[error("artifact scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("No package found in {}", .0.display())]
    NoArtifacts(PathBuf),

    #[error("signing error: {0}")]
    Signing(#[from] SigningError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Tools(_) => 1,
            PipelineError::Serialization(_) => 1,
            PipelineError::Config(_) => 2,
            PipelineError::HttpClient(_) => 2,
            PipelineError::Tree(_) => 3,
            PipelineError::Spec(_) => 4,
            PipelineError::Source(_) => 5,
            PipelineError::Dependencies(_) => 6,
            PipelineError::Build(_) => 7,
            PipelineError::Scan(_) => 8,
            PipelineError::NoArtifacts(_) => 9,
            PipelineError::Signing(_) => 10,
        }
    }

    /// Stable name of the failure class
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Config(_) | PipelineError::HttpClient(_) => "config",
            PipelineError::Tools(_) => "missing_tools",
            PipelineError::Tree(TreeError::Corrupt { .. }) => "tree_corrupt",
            PipelineError::Tree(_) => "tree_io",
            PipelineError::Spec(e) if e.is_io() => "spec_io",
            PipelineError::Spec(_) => "spec_parse",
            PipelineError::Source(SourceError::UnsupportedScheme { .. }) => {
                "unsupported_source_scheme"
            }
            PipelineError::Source(SourceError::FetchFailed { .. }) => "source_fetch_failed",
            PipelineError::Source(_) => "source_copy_failed",
            PipelineError::Dependencies(_) => "dependency_install_failed",
            PipelineError::Build(_) => "build_failed",
            PipelineError::Scan(_) => "scan_error",
            PipelineError::NoArtifacts(_) => "no_artifacts_found",
            PipelineError::Signing(SigningError::Setup(_)) => "ephemeral_resource_setup_failed",
            PipelineError::Signing(_) => "signing_failed",
            PipelineError::Serialization(_) => "serialization",
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// What to build and how
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    pub spec: PathBuf,
    pub mode: BuildMode,
    pub skip_deps: bool,
    /// Refresh repository metadata before installing dependencies
    pub latest_deps: bool,
    pub key: SigningKey,
}

impl BuildRequest {
    pub fn new(spec: impl Into<PathBuf>, mode: BuildMode) -> Self {
        Self {
            spec: spec.into(),
            mode,
            ..Default::default()
        }
    }

    /// Dependencies are never installed for source-only builds.
    pub fn installs_deps(&self) -> bool {
        !self.skip_deps && self.mode == BuildMode::Rpm
    }
}

/// Summary of a successful run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub spec: PathBuf,
    pub mode: BuildMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dependencies_installed: bool,
    pub sources: Vec<AcquiredSource>,
    pub artifacts: Vec<Artifact>,
    pub signing: SigningOutcome,
}

impl BuildReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// External collaborators of a pipeline run
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub parser: &'a dyn SpecParser,
    pub fetcher: &'a dyn Fetcher,
    pub deps: &'a dyn DependencyManager,
    pub builder: &'a dyn Builder,
    pub signer: &'a dyn PackageSigner,
    pub keyring: &'a dyn KeyringTool,
}

/// The real rpm, dnf, HTTP and signing tools
pub struct SystemTools {
    parser: RpmSpecParser,
    fetcher: HttpFetcher,
    deps: DnfBuildDep,
    builder: RpmBuild,
    signer: RpmSign,
    keyring: GnuPg,
}

impl SystemTools {
    pub fn from_config(config: &Config) -> PipelineResult<Self> {
        let tools = &config.tools;
        Ok(Self {
            parser: RpmSpecParser::new(tools.rpmspec.clone()),
            fetcher: HttpFetcher::new(&config.fetch).map_err(PipelineError::HttpClient)?,
            deps: DnfBuildDep::from_tools(tools),
            builder: RpmBuild::new(tools.rpmbuild.clone()),
            signer: RpmSign::new(tools.rpmsign.clone(), tools.sq.clone(), tools.gpg.clone()),
            keyring: GnuPg::new(tools.gpg.clone(), tools.gpgconf.clone()),
        })
    }

    pub fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            parser: &self.parser,
            fetcher: &self.fetcher,
            deps: &self.deps,
            builder: &self.builder,
            signer: &self.signer,
            keyring: &self.keyring,
        }
    }
}

/// Runs builds against one context
pub struct Pipeline<'a> {
    context: &'a BuildContext,
    tools: Collaborators<'a>,
}

impl<'a> Pipeline<'a> {
    pub fn new(context: &'a BuildContext, tools: Collaborators<'a>) -> Self {
        Self { context, tools }
    }

    pub fn run(&self, request: &BuildRequest) -> PipelineResult<BuildReport> {
        let started_at = Utc::now();
        let tree = self.context.tree();
        let spec = request.spec.as_path();

        // Key problems are reported up front; a rejected key only skips signing.
        let mut orchestrator = SigningOrchestrator::new(
            self.tools.signer,
            self.tools.keyring,
            self.context.config().keyring_parent(),
        );
        let key = orchestrator.validate(&request.key);

        // 1. Build tree
        debug!("ensuring build tree");
        tree.ensure()?;

        // 2. Sources
        let declared = SpecSourceResolver::new(self.tools.parser).resolve(spec)?;
        let sources =
            SourceAcquirer::new(&tree.source_dir, self.tools.fetcher).acquire_all(spec, &declared)?;

        // 3. Dependencies
        let dependencies_installed = request.installs_deps();
        if dependencies_installed {
            self.tools.deps.install(spec, request.latest_deps)?;
        } else {
            debug!(mode = %request.mode, skip = request.skip_deps, "skipping build dependencies");
        }

        // 4. Build into a clean output directory
        let output_role = request.mode.output_role();
        tree.clean(output_role)?;
        self.tools.builder.build(spec, request.mode)?;

        // 5. Artifacts
        let output_dir = tree.path(output_role);
        let packages = ArtifactCollector.list(output_dir)?;

        // 6. Signing
        let signing = match key {
            Ok(key) => {
                if packages.is_empty() {
                    return Err(PipelineError::NoArtifacts(output_dir.to_path_buf()));
                }
                let count = orchestrator.sign(&key, &packages)?;
                SigningOutcome::Signed {
                    backend: key.backend(),
                    count,
                }
            }
            Err(rejection) => {
                if packages.is_empty() {
                    warn!("No package found in {}", output_dir.display());
                }
                SigningOutcome::Skipped {
                    reason: rejection.to_string(),
                }
            }
        };

        // Digests are taken after signing changed the files.
        let artifacts = packages
            .iter()
            .map(|p| Artifact::describe(p))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            spec = %spec.display(),
            mode = %request.mode,
            packages = artifacts.len(),
            "build complete"
        );

        Ok(BuildReport {
            spec: spec.to_path_buf(),
            mode: request.mode,
            started_at,
            finished_at: Utc::now(),
            dependencies_installed,
            sources,
            artifacts,
            signing,
        })
    }
}

/// Relative output paths for display
pub fn display_path<'p>(path: &'p Path, base: &Path) -> std::borrow::Cow<'p, str> {
    match path.strip_prefix(base) {
        Ok(rel) => rel.to_string_lossy(),
        Err(_) => path.to_string_lossy(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TreeRole;

    #[test]
    fn test_pipeline_error_exit_codes() {
        assert_eq!(PipelineError::NoArtifacts(PathBuf::from("/rpms")).exit_code(), 9);
        assert_eq!(
            PipelineError::Tree(TreeError::Corrupt {
                role: TreeRole::Spec,
                path: PathBuf::from("/srv/SPECS"),
            })
            .exit_code(),
            3
        );
        assert_eq!(
            PipelineError::Spec(SpecError::Closed {
                path: PathBuf::from("a.spec")
            })
            .exit_code(),
            4
        );
        assert_eq!(PipelineError::Tools(MissingTools(vec!["dnf".into()])).exit_code(), 1);
    }

    #[test]
    fn test_error_kinds() {
        let corrupt = PipelineError::Tree(TreeError::Corrupt {
            role: TreeRole::Rpm,
            path: PathBuf::from("/srv/RPMS"),
        });
        assert_eq!(corrupt.kind(), "tree_corrupt");

        let closed = PipelineError::Spec(SpecError::Closed {
            path: PathBuf::from("a.spec"),
        });
        assert_eq!(closed.kind(), "spec_io");

        let scheme = PipelineError::Source(SourceError::UnsupportedScheme {
            scheme: "ftp".into(),
            origin: "ftp://example.org/a.tar.gz".into(),
        });
        assert_eq!(scheme.kind(), "unsupported_source_scheme");
    }

    #[test]
    fn test_srpm_builds_never_install_deps() {
        let mut request = BuildRequest::new("hello.spec", BuildMode::Srpm);
        assert!(!request.installs_deps());

        request.mode = BuildMode::Rpm;
        assert!(request.installs_deps());

        request.skip_deps = true;
        assert!(!request.installs_deps());
    }

    #[test]
    fn test_display_path() {
        let base = Path::new("/srv/rpmbuild/RPMS");
        assert_eq!(
            display_path(Path::new("/srv/rpmbuild/RPMS/noarch/a.rpm"), base),
            "noarch/a.rpm"
        );
        assert_eq!(display_path(Path::new("/elsewhere/b.rpm"), base), "/elsewhere/b.rpm");
    }
}
