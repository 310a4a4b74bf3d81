//! Macro expansion via `rpm --eval`
//!
//! The build tree locations live in the builder's own configuration
//! (`~/.rpmmacros`, `/usr/lib/rpm/macros`, ...). They are treated as opaque
//! strings: ask rpm, never compute.

use std::io;
use std::process::Command;

use thiserror::Error;
use tracing::debug;

/// Errors from macro expansion
#[derive(Debug, Error)]
pub enum MacroError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} --eval {expression} exited with {code}: {stderr}")]
    Failed {
        program: String,
        expression: String,
        code: String,
        stderr: String,
    },

    #[error("macro {expression} did not expand (got {value:?})")]
    Unexpanded { expression: String, value: String },
}

/// Expands rpm macro expressions to their configured values
pub trait MacroExpander {
    /// Expand `expression` (e.g. `%{_rpmdir}`) to its value.
    fn expand(&self, expression: &str) -> Result<String, MacroError>;
}

/// Expander backed by the `rpm` executable
#[derive(Debug, Clone)]
pub struct RpmMacros {
    program: String,
}

impl RpmMacros {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for RpmMacros {
    fn default() -> Self {
        Self::new("rpm")
    }
}

impl MacroExpander for RpmMacros {
    fn expand(&self, expression: &str) -> Result<String, MacroError> {
        debug!(program = %self.program, expression, "expanding macro");

        let output = Command::new(&self.program)
            .arg("--eval")
            .arg(expression)
            .output()
            .map_err(|source| MacroError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(MacroError::Failed {
                program: self.program.clone(),
                expression: expression.to_string(),
                code: output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        check_expanded(expression, String::from_utf8_lossy(&output.stdout).trim())
    }
}

/// Reject values rpm handed back untouched or empty.
///
/// `rpm --eval` echoes unknown macros verbatim instead of failing.
fn check_expanded(expression: &str, value: &str) -> Result<String, MacroError> {
    if value.is_empty() || value.contains("%{") {
        return Err(MacroError::Unexpanded {
            expression: expression.to_string(),
            value: value.to_string(),
        });
    }
    Ok(value.to_string())
}
