//! External process invocation
//!
//! Every external tool (rpmbuild, dnf, rpmsign, gpg) is described as an
//! [`Invocation`] first and executed second, so command construction is
//! testable without the tools installed.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::process::{Command, ExitStatus, Stdio};

use thiserror::Error;
use tracing::debug;

/// Errors from running an external process
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {}", describe_status(.status))]
    Exit { program: String, status: ExitStatus },

    #[error("{program} exited with {}: {stderr}", describe_status(.status))]
    ExitWithOutput {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

fn describe_status(status: &ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("status {}", code),
        None => "no status (killed by signal)".to_string(),
    }
}

/// A program plus its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: OsString,
    args: Vec<OsString>,
}

impl Invocation {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Prefix the whole invocation with another program (e.g. `sudo`).
    pub fn wrapped_with(self, program: impl AsRef<OsStr>) -> Self {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: program.as_ref().to_os_string(),
            args,
        }
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    /// Arguments as lossy strings, for assertions and logs.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Run with the caller's stdin/stdout/stderr so an operator sees live
    /// output.
    pub fn run_inherited(&self) -> Result<(), ProcessError> {
        debug!(command = %self, "running");
        let status = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|source| ProcessError::Spawn {
                program: self.program_name(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(ProcessError::Exit {
                program: self.program_name(),
                status,
            })
        }
    }

    /// Run with output captured; stderr is attached to the error on failure.
    pub fn run_captured(&self) -> Result<String, ProcessError> {
        debug!(command = %self, "running (captured)");
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ProcessError::Spawn {
                program: self.program_name(),
                source,
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(ProcessError::ExitWithOutput {
                program: self.program_name(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}
