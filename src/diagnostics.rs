//! Structured diagnostics.
//!
//! Every anomaly the compiler detects becomes a [`Diagnostic`] published
//! through a [`DiagnosticSink`]. Nothing here ever propagates as an error out
//! of `compile_html`.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;

// ═══════════════════════════════════════════════════════════════════════════════
// DIAGNOSTIC CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const DIAG_ORPHAN_ELSE: &str = "MC001";
pub const DIAG_MISSING_ATTRIBUTE: &str = "MC002";
pub const DIAG_EMPTY_ALIAS: &str = "MC003";
pub const DIAG_RESERVED_NAME: &str = "MC004";
pub const DIAG_IMPORT_AFTER_CONTENT: &str = "MC005";
pub const DIAG_UNSUPPORTED_IMPORT: &str = "MC006";
pub const DIAG_DUPLICATE_ALIAS: &str = "MC007";
pub const DIAG_MISPLACED_EXPORT: &str = "MC008";
pub const DIAG_FAILED_BUILD_SCRIPT: &str = "MC101";
pub const DIAG_UNSUPPORTED_REEXPORT: &str = "MC102";
pub const DIAG_FAILED_EXPRESSION: &str = "MC201";
pub const DIAG_INVALID_EXPAND_RESULT: &str = "MC202";
pub const DIAG_NON_ITERABLE: &str = "MC203";
pub const DIAG_UNKNOWN_PORTAL: &str = "MC301";
pub const DIAG_DUPLICATE_PORTAL: &str = "MC302";
pub const DIAG_MISSING_EXPORT: &str = "MC303";
pub const DIAG_COMPONENT_MISSING_EXPORT: &str = "MC304";
pub const DIAG_COMPONENT_READ_FAILED: &str = "MC305";
pub const DIAG_CIRCULAR_IMPORT: &str = "MC306";
pub const DIAG_RECURSIVE_EXPANSION: &str = "MC307";
pub const DIAG_CLIENT_SCRIPT_PARSE: &str = "MC308";

/// How far the damage of a diagnosed anomaly reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    /// Only the offending marker is left unresolved.
    ExpressionLocal,
    /// The enclosing scope is discarded or replaced by its fallback.
    ScopeLocal,
    /// The offending node is removed or left inert.
    Advisory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticTag {
    OrphanElse,
    MissingAttribute,
    EmptyAlias,
    ReservedName,
    ImportAfterContent,
    UnsupportedImport,
    DuplicateAlias,
    MisplacedExport,
    FailedBuildScript,
    UnsupportedReexport,
    FailedExpression,
    InvalidExpandResult,
    NonIterable,
    UnknownPortal,
    DuplicatePortal,
    MissingExport,
    ComponentMissingExport,
    ComponentReadFailed,
    CircularImport,
    RecursiveExpansion,
    ClientScriptParse,
}

impl DiagnosticTag {
    pub fn code(self) -> &'static str {
        match self {
            DiagnosticTag::OrphanElse => DIAG_ORPHAN_ELSE,
            DiagnosticTag::MissingAttribute => DIAG_MISSING_ATTRIBUTE,
            DiagnosticTag::EmptyAlias => DIAG_EMPTY_ALIAS,
            DiagnosticTag::ReservedName => DIAG_RESERVED_NAME,
            DiagnosticTag::ImportAfterContent => DIAG_IMPORT_AFTER_CONTENT,
            DiagnosticTag::UnsupportedImport => DIAG_UNSUPPORTED_IMPORT,
            DiagnosticTag::DuplicateAlias => DIAG_DUPLICATE_ALIAS,
            DiagnosticTag::MisplacedExport => DIAG_MISPLACED_EXPORT,
            DiagnosticTag::FailedBuildScript => DIAG_FAILED_BUILD_SCRIPT,
            DiagnosticTag::UnsupportedReexport => DIAG_UNSUPPORTED_REEXPORT,
            DiagnosticTag::FailedExpression => DIAG_FAILED_EXPRESSION,
            DiagnosticTag::InvalidExpandResult => DIAG_INVALID_EXPAND_RESULT,
            DiagnosticTag::NonIterable => DIAG_NON_ITERABLE,
            DiagnosticTag::UnknownPortal => DIAG_UNKNOWN_PORTAL,
            DiagnosticTag::DuplicatePortal => DIAG_DUPLICATE_PORTAL,
            DiagnosticTag::MissingExport => DIAG_MISSING_EXPORT,
            DiagnosticTag::ComponentMissingExport => DIAG_COMPONENT_MISSING_EXPORT,
            DiagnosticTag::ComponentReadFailed => DIAG_COMPONENT_READ_FAILED,
            DiagnosticTag::CircularImport => DIAG_CIRCULAR_IMPORT,
            DiagnosticTag::RecursiveExpansion => DIAG_RECURSIVE_EXPANSION,
            DiagnosticTag::ClientScriptParse => DIAG_CLIENT_SCRIPT_PARSE,
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            DiagnosticTag::FailedExpression | DiagnosticTag::InvalidExpandResult => {
                Severity::ExpressionLocal
            }
            DiagnosticTag::FailedBuildScript | DiagnosticTag::NonIterable => Severity::ScopeLocal,
            _ => Severity::Advisory,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GUARANTEES
// ═══════════════════════════════════════════════════════════════════════════════

fn get_guarantee(tag: DiagnosticTag) -> &'static str {
    match tag {
        DiagnosticTag::OrphanElse => {
            "<else> and <else-if> must directly follow an <if>, <else-if> or <for>."
        }
        DiagnosticTag::MissingAttribute => "Structural elements carry their required attributes.",
        DiagnosticTag::EmptyAlias => "Component aliases are non-empty tag names.",
        DiagnosticTag::ReservedName => "Built-in tag names cannot be remapped.",
        DiagnosticTag::ImportAfterContent => "Imports appear before any other content.",
        DiagnosticTag::UnsupportedImport => "Only .html and .svg documents can be imported.",
        DiagnosticTag::DuplicateAlias => "Each alias names exactly one component.",
        DiagnosticTag::MisplacedExport => "<export> is only legal at document level.",
        DiagnosticTag::FailedBuildScript => "A failing build script discards only its scope.",
        DiagnosticTag::UnsupportedReexport => "Build scripts cannot re-export other modules.",
        DiagnosticTag::FailedExpression => "A failing expression leaves only its marker unresolved.",
        DiagnosticTag::InvalidExpandResult => "expand spreads an object onto the element.",
        DiagnosticTag::NonIterable => "<for each> iterates arrays only.",
        DiagnosticTag::UnknownPortal => "Transferred nodes target an existing portal.",
        DiagnosticTag::DuplicatePortal => "Portal names are unique per document.",
        DiagnosticTag::MissingExport => "Exported names are bound before they are exported.",
        DiagnosticTag::ComponentMissingExport => "assign: only binds names the component exports.",
        DiagnosticTag::ComponentReadFailed => "Imported components are readable documents.",
        DiagnosticTag::CircularImport => "Component imports form no cycles.",
        DiagnosticTag::RecursiveExpansion => "Fragment and component nesting is bounded.",
        DiagnosticTag::ClientScriptParse => "Client scripts importing build data must parse.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIAGNOSTIC
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    /// Converts a byte offset into a 1-based line/column pair.
    pub fn from_offset(source: &str, offset: usize) -> Self {
        let prefix = &source[..offset.min(source.len())];
        let line = prefix.matches('\n').count() as u32 + 1;
        let column = match prefix.rfind('\n') {
            Some(pos) => prefix[pos + 1..].chars().count(),
            None => prefix.chars().count(),
        } as u32
            + 1;
        Self { line, column }
    }

    /// Location of the first occurrence of `needle` in `source`.
    pub fn find(source: &str, needle: &str) -> Option<Self> {
        if needle.is_empty() {
            return None;
        }
        source
            .find(needle)
            .map(|offset| Self::from_offset(source, offset))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub tag: DiagnosticTag,
    pub code: String,
    pub severity: Severity,
    pub message: String,
    pub guarantee: String,
    pub source_file: String,
    pub location: Option<SourceLocation>,
    /// The offending snippet: an expression, tag name, alias or URL.
    pub context: Option<String>,
}

impl Diagnostic {
    pub fn new(tag: DiagnosticTag, source_file: &str, message: impl Into<String>) -> Self {
        Diagnostic {
            tag,
            code: tag.code().to_string(),
            severity: tag.severity(),
            message: message.into(),
            guarantee: get_guarantee(tag).to_string(),
            source_file: source_file.to_string(),
            location: None,
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Points the diagnostic at the first occurrence of `snippet` in the
    /// unit source, when there is one.
    pub fn located(mut self, source: &str, snippet: &str) -> Self {
        if let Some(location) = SourceLocation::find(source, snippet) {
            self.location = Some(location);
        }
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.source_file)?;
        if let Some(loc) = &self.location {
            write!(f, ":{}:{}", loc.line, loc.column)?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(context) = &self.context {
            write!(f, " ({})", context)?;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SINKS
// ═══════════════════════════════════════════════════════════════════════════════

pub trait DiagnosticSink {
    fn publish(&self, diagnostic: Diagnostic);
}

/// Buffers every published diagnostic in order.
#[derive(Debug, Default)]
pub struct CollectingSink {
    messages: RefCell<Vec<Diagnostic>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<Diagnostic> {
        self.messages.borrow().clone()
    }

    pub fn tags(&self) -> Vec<DiagnosticTag> {
        self.messages.borrow().iter().map(|d| d.tag).collect()
    }

    pub fn count(&self, tag: DiagnosticTag) -> usize {
        self.messages.borrow().iter().filter(|d| d.tag == tag).count()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.borrow().is_empty()
    }

    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.messages.borrow_mut())
    }
}

impl DiagnosticSink for CollectingSink {
    fn publish(&self, diagnostic: Diagnostic) {
        self.messages.borrow_mut().push(diagnostic);
    }
}

/// Forwards diagnostics to `tracing` at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn publish(&self, diagnostic: Diagnostic) {
        tracing::warn!(
            code = %diagnostic.code,
            file = %diagnostic.source_file,
            "{}",
            diagnostic.message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_from_offset() {
        let src = "const a = 1;\nconst b = ;";
        let loc = SourceLocation::from_offset(src, 23);
        assert_eq!(loc, SourceLocation { line: 2, column: 11 });
        assert_eq!(SourceLocation::from_offset(src, 0), SourceLocation { line: 1, column: 1 });
    }

    #[test]
    fn test_diagnostic_carries_code_and_guarantee() {
        let d = Diagnostic::new(DiagnosticTag::NonIterable, "/index.html", "each is not an array")
            .with_context("{{ 5 }}");
        assert_eq!(d.code, DIAG_NON_ITERABLE);
        assert_eq!(d.severity, Severity::ScopeLocal);
        assert!(d.guarantee.contains("arrays"));
        assert_eq!(
            d.to_string(),
            "[MC203] /index.html: each is not an array ({{ 5 }})"
        );
    }

    #[test]
    fn test_collecting_sink_keeps_order() {
        let sink = CollectingSink::new();
        sink.publish(Diagnostic::new(DiagnosticTag::OrphanElse, "a", "x"));
        sink.publish(Diagnostic::new(DiagnosticTag::UnknownPortal, "a", "y"));
        assert_eq!(
            sink.tags(),
            vec![DiagnosticTag::OrphanElse, DiagnosticTag::UnknownPortal]
        );
        assert_eq!(sink.count(DiagnosticTag::OrphanElse), 1);
    }

    #[test]
    fn test_serializes_camel_case() {
        let d = Diagnostic::new(DiagnosticTag::FailedBuildScript, "/a.html", "boom");
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["tag"], "failed-build-script");
        assert_eq!(json["sourceFile"], "/a.html");
    }
}
