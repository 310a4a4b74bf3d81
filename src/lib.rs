//! rpmtool - build and sign RPM packages
//!
//! Drives one build from a spec file: stages the declared sources into the
//! rpm build tree, installs build dependencies, runs rpmbuild, finds the
//! produced packages and optionally signs them. rpm, dnf, rpmbuild and the
//! signing tools do the real work; this crate sequences them and cleans up
//! after them.

pub mod artifact;
pub mod build;
pub mod config;
pub mod context;
pub mod deps;
pub mod logging;
pub mod pipeline;
pub mod process;
pub mod signing;
pub mod source;
pub mod tools;
pub mod tree;

pub use build::{BuildMode, Builder};
pub use config::{Config, LoadedConfig};
pub use context::BuildContext;
pub use pipeline::{BuildReport, BuildRequest, Collaborators, Pipeline, PipelineError, SystemTools};
pub use signing::{SignerBackend, SigningKey, SigningOutcome};
pub use tree::{BuildTree, TreeRole};
