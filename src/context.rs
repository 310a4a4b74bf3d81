//! Process-wide build context
//!
//! Created once at start-up and handed to every component that needs the
//! tree locations or configuration. Tests build one from a temp directory.

use std::path::Path;

use rpmtool_rpm::{MacroExpander, RpmMacros};

use crate::config::Config;
use crate::tree::{BuildTree, TreeError};

/// Configuration plus resolved build tree
#[derive(Debug, Clone)]
pub struct BuildContext {
    config: Config,
    tree: BuildTree,
}

impl BuildContext {
    pub fn new(config: Config, tree: BuildTree) -> Self {
        Self { config, tree }
    }

    /// Resolve the tree through `rpm --eval` using the configured `rpm`.
    pub fn from_config(config: Config) -> Result<Self, TreeError> {
        let macros = RpmMacros::new(config.tools.rpm.clone());
        Self::with_expander(config, &macros)
    }

    pub fn with_expander(config: Config, macros: &dyn MacroExpander) -> Result<Self, TreeError> {
        let tree = BuildTree::from_macros(macros)?;
        Ok(Self { config, tree })
    }

    /// Context whose tree is the conventional layout under `top`.
    pub fn rooted_at(config: Config, top: &Path) -> Self {
        Self::new(config, BuildTree::rooted_at(top))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tree(&self) -> &BuildTree {
        &self.tree
    }
}
