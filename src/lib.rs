//! # markup-compiler
//!
//! Compiles extended HTML into plain HTML at build time.
//!
//! ## Source format
//!
//! - `{{ expr }}` markers in text and attribute values; `\{{ }}` escapes one.
//! - `<script build>` runs at compile time. Its top-level declarations become
//!   bindings that later markers and scripts of the same document read.
//! - `<if condition>`, `<else-if condition>`, `<else>` and
//!   `<for each as index>` with an optional `<else>` fallback.
//! - `<import from as>` names another document; `<alias>` call sites are
//!   replaced by its compiled markup, with children filling `<slot>`s.
//! - `<fragment name>` defines a reusable subtree referenced by name.
//! - `<export name as>`, `<portal name>` / `portal="name"`, and `<raw>`.
//!
//! ## Failure tiers
//!
//! 1. A failing marker is left as written.
//! 2. A failing build script empties the scope that holds it.
//! 3. Malformed markup is removed or left inert.
//!
//! Every anomaly is published as a [`Diagnostic`]; [`compile_html`] always
//! returns a document.

mod bindings;
mod build_script;
mod builtins;
mod classify;
mod client_data;
mod compile;
mod component;
pub mod config;
mod control_flow;
pub mod diagnostics;
pub mod dom;
pub mod error;
mod expression;
mod finalize;
mod fragment;
pub mod host;
mod interpreter;
mod lower;
pub mod parse;
mod script_ir;
pub mod value;
mod visitor;

#[cfg(test)]
mod compile_tests;
#[cfg(test)]
mod component_tests;
#[cfg(test)]
mod expression_tests;
#[cfg(test)]
mod parse_tests;

pub use classify::RESERVED_TAGS;
pub use compile::{compile_html, CompileOptions, CompileOutput, SourceFile};
pub use config::CompilerConfig;
pub use diagnostics::{
    CollectingSink, Diagnostic, DiagnosticSink, DiagnosticTag, Severity, SourceLocation,
    TracingSink,
};
pub use error::{ConfigError, HostError, ScriptError};
pub use host::{resolve_url, CompilerHost, FsHost, MemoryHost};
pub use parse::ParsedDocument;
pub use value::{BuildStore, Value};
