//! Error types for the compiler's internal seams.
//!
//! None of these cross `compile_html`: script and host failures are caught by
//! the pipeline and published as diagnostics.

use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by a [`crate::host::CompilerHost`].
#[derive(Debug, Clone, Error)]
pub enum HostError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("failed to read {url}: {message}")]
    Io { url: String, message: String },

    #[error("failed to load module {url}: {message}")]
    Module { url: String, message: String },

    #[error("circular module import: {0}")]
    Cycle(String),
}

/// Failure while lowering or running an expression or build script.
#[derive(Debug, Clone, Error)]
pub enum ScriptError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("unsupported syntax: {0}")]
    Unsupported(String),

    /// A value thrown by user code (or a runtime `TypeError`/`ReferenceError`),
    /// already rendered as `Name: message`.
    #[error("{0}")]
    Thrown(String),

    #[error("execution limit exceeded: {0}")]
    Limit(String),

    #[error(transparent)]
    ModuleLoad(#[from] HostError),
}

/// Failure loading a [`crate::config::CompilerConfig`] file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Rejected write to a [`crate::bindings::Bindings`] environment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("Assignment to constant variable '{0}'")]
    ConstAssignment(String),

    #[error("{0} is not defined")]
    Undeclared(String),

    #[error("Identifier '{0}' has already been declared")]
    Redeclared(String),
}
