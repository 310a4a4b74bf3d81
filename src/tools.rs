//! External tool presence checks
//!
//! Tools are looked up on `PATH` the way a shell would. A configured tool
//! that contains a `/` is checked as a path instead.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::config::ToolsConfig;
use crate::signing::SignerBackend;

const CHECK_MARK: &str = "\u{2713}";
const CROSS_MARK: &str = "\u{2717}";

/// Tool check errors
#[derive(Debug, Error)]
#[error("required tools not found: [{}]", .0.join(","))]
pub struct MissingTools(pub Vec<String>);

/// A tool the pipeline shells out to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tool {
    /// Role name, e.g. `rpmbuild`
    pub name: &'static str,
    /// Configured program
    pub program: String,
}

/// Result of looking one tool up
#[derive(Debug, Clone, Serialize)]
pub struct ToolCheck {
    pub tool: Tool,
    pub found: Option<PathBuf>,
}

impl ToolCheck {
    pub fn is_found(&self) -> bool {
        self.found.is_some()
    }
}

impl fmt::Display for ToolCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.is_found() { CHECK_MARK } else { CROSS_MARK };
        write!(f, "  {} {}", mark, self.tool.program)
    }
}

fn tool(name: &'static str, program: &str) -> Tool {
    Tool {
        name,
        program: program.to_string(),
    }
}

/// Tools needed to resolve, build and install dependencies.
///
/// `sudo` is only listed when the current user is not privileged.
pub fn build_tools(tools: &ToolsConfig, privileged: bool) -> Vec<Tool> {
    let mut list = vec![
        tool("rpm", &tools.rpm),
        tool("rpmspec", &tools.rpmspec),
        tool("rpmbuild", &tools.rpmbuild),
        tool("dnf", &tools.dnf),
    ];
    if !privileged {
        list.push(tool("sudo", &tools.sudo));
    }
    list
}

/// Tools a signing backend needs. `None` lists every signing tool.
pub fn signature_tools(tools: &ToolsConfig, backend: Option<SignerBackend>) -> Vec<Tool> {
    let mut list = vec![tool("rpmsign", &tools.rpmsign)];
    match backend {
        Some(SignerBackend::SequoiaKeyId) | Some(SignerBackend::SequoiaKeyFile) => {
            list.push(tool("sq", &tools.sq));
        }
        Some(SignerBackend::EphemeralKeyring) => {
            list.push(tool("gpg", &tools.gpg));
            list.push(tool("gpgconf", &tools.gpgconf));
        }
        None => {
            list.push(tool("sq", &tools.sq));
            list.push(tool("gpg", &tools.gpg));
            list.push(tool("gpgconf", &tools.gpgconf));
        }
    }
    list
}

pub fn check_tools(tools: &[Tool]) -> Vec<ToolCheck> {
    tools
        .iter()
        .map(|t| ToolCheck {
            tool: t.clone(),
            found: find_executable(&t.program),
        })
        .collect()
}

/// Fail with the names of every missing tool.
pub fn require_tools(tools: &[Tool]) -> Result<(), MissingTools> {
    let missing: Vec<String> = check_tools(tools)
        .into_iter()
        .filter(|c| !c.is_found())
        .map(|c| c.tool.program)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(MissingTools(missing))
    }
}

/// Resolve a program name the way `execvp` would.
pub fn find_executable(program: &str) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }
    if program.contains('/') {
        let path = PathBuf::from(program);
        return is_executable(&path).then_some(path);
    }

    let path_var = env::var_os("PATH")?;
    env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
