//! rpm toolchain adapters for rpmtool
//!
//! The orchestration core never talks to rpm directly. It asks questions
//! through two narrow seams defined here:
//! - [`MacroExpander`]: expand a macro such as `%{_sourcedir}` to its value
//! - [`SpecParser`] / [`SpecHandle`]: open a spec and enumerate its sources
//!
//! The shipped implementations shell out to `rpm --eval` and
//! `rpmspec --parse`. Tests substitute in-memory fakes.

pub mod macros;
pub mod spec;

pub use macros::{MacroError, MacroExpander, RpmMacros};
pub use spec::{
    parse_source_tags, source_file_name, DeclaredSource, RpmSpecHandle, RpmSpecParser,
    SpecError, SpecHandle, SpecParser,
};
