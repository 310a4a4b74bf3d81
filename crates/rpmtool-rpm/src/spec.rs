//! Spec parsing
//!
//! A spec is opened into a [`SpecHandle`], its declared sources are read in
//! declaration order, and the handle is closed. Handles close themselves on
//! drop so an early return never leaks one.
//!
//! [`RpmSpecParser`] lets `rpmspec --parse` do macro expansion and
//! conditionals, then reads `SourceN:` / `PatchN:` tags out of the expanded
//! text.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use regex_lite::Regex;
use thiserror::Error;
use tracing::debug;

/// Section headers that end a preamble.
const BODY_SECTIONS: &[&str] = &[
    "%description",
    "%prep",
    "%generate_buildrequires",
    "%conf",
    "%build",
    "%install",
    "%check",
    "%clean",
    "%files",
    "%changelog",
    "%pre",
    "%post",
    "%preun",
    "%postun",
    "%pretrans",
    "%posttrans",
    "%verifyscript",
    "%triggerin",
    "%triggerun",
    "%triggerpostun",
    "%filetriggerin",
    "%filetriggerun",
    "%transfiletriggerin",
    "%transfiletriggerun",
];

/// One source declared by a spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredSource {
    /// Name the source must have inside the source directory
    pub file_name: String,
    /// Bare path relative to the spec, or a URI
    pub origin_path: String,
}

/// Spec errors
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("unable to open spec {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse spec {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("unable to enumerate sources of {path}: {message}")]
    Sources { path: PathBuf, message: String },

    #[error("spec handle for {path} is already closed")]
    Closed { path: PathBuf },
}

impl SpecError {
    /// True for failures while enumerating an already-parsed spec.
    pub fn is_io(&self) -> bool {
        matches!(self, SpecError::Sources { .. } | SpecError::Closed { .. })
    }
}

/// An open, parsed spec
pub trait SpecHandle {
    /// Declared sources, in declaration order.
    fn sources(&mut self) -> Result<Vec<DeclaredSource>, SpecError>;

    /// Release the handle. Calling it more than once is a no-op.
    fn close(&mut self);
}

/// Opens specs
pub trait SpecParser {
    fn open(&self, path: &Path) -> Result<Box<dyn SpecHandle>, SpecError>;
}

/// Parser backed by `rpmspec --parse`
#[derive(Debug, Clone)]
pub struct RpmSpecParser {
    program: String,
}

impl RpmSpecParser {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for RpmSpecParser {
    fn default() -> Self {
        Self::new("rpmspec")
    }
}

impl SpecParser for RpmSpecParser {
    fn open(&self, path: &Path) -> Result<Box<dyn SpecHandle>, SpecError> {
        if !path.is_file() {
            return Err(SpecError::Open {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "not a regular file"),
            });
        }

        debug!(program = %self.program, spec = %path.display(), "parsing spec");
        let output = Command::new(&self.program)
            .arg("--parse")
            .arg(path)
            .output()
            .map_err(|source| SpecError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        if !output.status.success() {
            return Err(SpecError::Parse {
                path: path.to_path_buf(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8(output.stdout).map_err(|e| SpecError::Parse {
            path: path.to_path_buf(),
            message: format!("expanded spec is not UTF-8: {}", e),
        })?;

        Ok(Box::new(RpmSpecHandle::new(path, text)))
    }
}

/// Handle over the expanded text of a spec
#[derive(Debug)]
pub struct RpmSpecHandle {
    path: PathBuf,
    text: Option<String>,
}

impl RpmSpecHandle {
    pub fn new(path: &Path, text: String) -> Self {
        Self {
            path: path.to_path_buf(),
            text: Some(text),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.text.is_none()
    }
}

impl SpecHandle for RpmSpecHandle {
    fn sources(&mut self) -> Result<Vec<DeclaredSource>, SpecError> {
        let text = self.text.as_deref().ok_or_else(|| SpecError::Closed {
            path: self.path.clone(),
        })?;
        parse_source_tags(text).map_err(|message| SpecError::Sources {
            path: self.path.clone(),
            message,
        })
    }

    fn close(&mut self) {
        if self.text.take().is_some() {
            debug!(spec = %self.path.display(), "closed spec handle");
        }
    }
}

impl Drop for RpmSpecHandle {
    fn drop(&mut self) {
        self.close();
    }
}

fn source_tag() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| {
        Regex::new(r"^(?i:source|patch)[0-9]*\s*:\s*(\S.*?)\s*$").expect("static regex")
    })
}

/// Read `SourceN:` / `PatchN:` tags out of an expanded spec.
///
/// Only preamble lines count (the main preamble and `%package` preambles);
/// text under `%description`, `%changelog` and script sections is skipped.
pub fn parse_source_tags(text: &str) -> Result<Vec<DeclaredSource>, String> {
    let mut sources = Vec::new();
    let mut in_preamble = true;

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim_start();

        if line.starts_with('%') {
            let word = line.split_whitespace().next().unwrap_or("");
            if word == "%package" {
                in_preamble = true;
            } else if BODY_SECTIONS.contains(&word) {
                in_preamble = false;
            }
            continue;
        }

        if !in_preamble {
            continue;
        }

        let Some(captures) = source_tag().captures(line) else {
            continue;
        };
        let origin_path = captures[1].to_string();
        let file_name = source_file_name(&origin_path).ok_or_else(|| {
            format!(
                "line {}: no file name in source {:?}",
                index + 1,
                origin_path
            )
        })?;

        sources.push(DeclaredSource {
            file_name,
            origin_path,
        });
    }

    Ok(sources)
}

/// File name rpm assigns to a source origin.
///
/// The last path component, except that a URL may name its file explicitly
/// with a `#/name` fragment (`https://host/download?id=4#/foo-1.0.tar.gz`).
pub fn source_file_name(origin: &str) -> Option<String> {
    let is_url = origin.contains("://");
    let candidate = match origin.rfind("#/") {
        Some(pos) if is_url => &origin[pos + 2..],
        _ => origin,
    };

    let name = candidate.rsplit('/').next().unwrap_or("");
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}
