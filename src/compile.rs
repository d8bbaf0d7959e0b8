//! Document compilation.
//!
//! `compile_html` parses a source, compiles its root scope and runs the
//! post-passes. Every scope runs the same fixed sequence:
//!
//! 1. fragment references are expanded
//! 2. build scripts run in document order; a failure empties the scope
//! 3. markers in text and attributes are substituted, client scripts get
//!    their build data, `raw` wrappers are unwrapped, and the unit root
//!    evaluates its `<export>` elements
//! 4. imported units rebase relative URLs
//! 5. component call sites are resolved
//! 6. conditional groups render
//! 7. loops render
//!
//! Steps 1, 5, 6 and 7 compile nested scopes through [`Compiler::compile_scope`].

use indexmap::IndexMap;
use markup5ever_rcdom::Handle;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use tracing::{debug, info};

use crate::bindings::Bindings;
use crate::build_script::{self, ScriptContext};
use crate::classify::{classify, find_definitions, ClassifyContext, FragmentScope, ImportRecord};
use crate::client_data::{has_build_import, inline_build_imports, BuildExports, InlineIssue};
use crate::config::CompilerConfig;
use crate::diagnostics::{Diagnostic, DiagnosticSink, DiagnosticTag};
use crate::dom;
use crate::error::ScriptError;
use crate::expression::{contains_marker, full_marker, substitute, ExpressionCache, Substitution};
use crate::finalize;
use crate::host::{is_relative_reference, CompilerHost};
use crate::interpreter::{Interpreter, Realm};
use crate::parse::{parse_document_source, ParsedDocument};
use crate::script_ir::PublicAlias;
use crate::value::{BuildStore, Value};

// ═══════════════════════════════════════════════════════════════════════════════
// PUBLIC API
// ═══════════════════════════════════════════════════════════════════════════════

/// A virtual source document.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub url: String,
    pub content: String,
}

impl SourceFile {
    pub fn new(url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content: content.into(),
        }
    }
}

pub struct CompileOptions<'a> {
    /// The root unit's `props`.
    pub properties: Value,
    /// Shared with every script of the compile. Pass an
    /// [`BuildStore::isolated_copy`] when compiles run side by side.
    pub build_store: BuildStore,
    pub diagnostics: &'a dyn DiagnosticSink,
    pub host: &'a dyn CompilerHost,
    pub config: &'a CompilerConfig,
}

#[derive(Debug)]
pub struct CompileOutput {
    pub document: ParsedDocument,
    /// Values published by the root document's `<export>` elements.
    pub exports: IndexMap<String, Value>,
}

impl CompileOutput {
    pub fn html(&self) -> String {
        self.document.html()
    }
}

/// Compiles one document. Never fails: every problem is published to
/// `options.diagnostics` and the best-effort tree is returned.
pub async fn compile_html(file: SourceFile, options: CompileOptions<'_>) -> CompileOutput {
    info!(url = %file.url, "compile start");
    let compiler = Compiler::new(&options);
    let document = parse_document_source(&file.url, &file.content);
    let unit = Unit::new(
        file.url.clone(),
        file.content,
        &document,
        options.properties.clone(),
        vec![file.url.clone()],
        false,
    );

    compiler.compile_unit(&unit).await;
    finalize::resolve_portals(&document.root, &unit.url, &unit.source, &compiler);
    finalize::strip_artifacts(&document.root, options.config);

    info!(
        url = %file.url,
        diagnostics = compiler.published(),
        expressions = compiler.expressions.len(),
        "compile finished"
    );
    CompileOutput {
        document,
        exports: unit.exports.into_inner(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILATION UNIT
// ═══════════════════════════════════════════════════════════════════════════════

/// One parsed document with its own bindings, imports and exports.
pub(crate) struct Unit {
    pub url: String,
    pub source: String,
    pub root: Handle,
    pub full_document: bool,
    pub props: Value,
    pub bindings: Bindings,
    pub aliases: RefCell<Vec<PublicAlias>>,
    pub imports: RefCell<IndexMap<String, ImportRecord>>,
    /// URLs from the top-level document down to this unit.
    pub chain: Vec<String>,
    /// Reached through an `<import>`; its relative URLs get rebased.
    pub imported: bool,
    pub exports: RefCell<IndexMap<String, Value>>,
}

impl Unit {
    pub fn new(
        url: String,
        source: String,
        document: &ParsedDocument,
        props: Value,
        chain: Vec<String>,
        imported: bool,
    ) -> Self {
        Self {
            url,
            source,
            root: document.root.clone(),
            full_document: document.full_document,
            props,
            bindings: Bindings::new(),
            aliases: RefCell::new(Vec::new()),
            imports: RefCell::new(IndexMap::new()),
            chain,
            imported,
            exports: RefCell::new(IndexMap::new()),
        }
    }

    /// The value behind a public name: the build-script alias first, then
    /// the binding of the same name.
    pub fn public_value(&self, name: &str) -> Option<Value> {
        let local = self
            .aliases
            .borrow()
            .iter()
            .rev()
            .find(|alias| alias.exported == name)
            .map(|alias| alias.local.clone());
        match local {
            Some(local) => self.bindings.get(&local),
            None => self.bindings.get(name),
        }
    }
}

impl BuildExports for Unit {
    fn get(&self, exported: &str) -> Option<Value> {
        let local = self
            .aliases
            .borrow()
            .iter()
            .rev()
            .find(|alias| alias.exported == exported)
            .map(|alias| alias.local.clone())?;
        self.bindings.get(&local)
    }

    fn all(&self) -> Vec<(String, Value)> {
        let aliases = self.aliases.borrow().clone();
        let mut out: IndexMap<String, Value> = IndexMap::new();
        for alias in aliases {
            out.insert(
                alias.exported,
                self.bindings.get(&alias.local).unwrap_or_default(),
            );
        }
        out.into_iter().collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER
// ═══════════════════════════════════════════════════════════════════════════════

pub(crate) type ScopeFuture<'s> = Pin<Box<dyn Future<Output = ()> + 's>>;

/// State shared by every unit of one compile.
pub(crate) struct Compiler<'a> {
    pub store: BuildStore,
    pub host: &'a dyn CompilerHost,
    pub config: &'a CompilerConfig,
    pub expressions: ExpressionCache,
    sink: &'a dyn DiagnosticSink,
    published: Cell<usize>,
}

impl DiagnosticSink for Compiler<'_> {
    fn publish(&self, diagnostic: Diagnostic) {
        debug!(code = %diagnostic.code, "diagnostic");
        self.published.set(self.published.get() + 1);
        self.sink.publish(diagnostic);
    }
}

impl<'a> Compiler<'a> {
    pub fn new(options: &CompileOptions<'a>) -> Self {
        Self {
            store: options.build_store.clone(),
            host: options.host,
            config: options.config,
            expressions: ExpressionCache::new(),
            sink: options.diagnostics,
            published: Cell::new(0),
        }
    }

    pub fn published(&self) -> usize {
        self.published.get()
    }

    pub fn diagnose(&self, unit: &Unit, tag: DiagnosticTag, message: String, snippet: &str) {
        self.publish(
            Diagnostic::new(tag, &unit.url, message)
                .with_context(snippet)
                .located(&unit.source, snippet),
        );
    }

    pub async fn compile_unit(&self, unit: &Unit) {
        debug!(url = %unit.url, depth = unit.chain.len(), "compile unit");
        self.compile_scope(unit, unit.root.clone(), FragmentScope::root())
            .await;
    }

    fn classify_context<'c>(
        &'c self,
        unit: &'c Unit,
        scope: &Handle,
        fragments: &'c FragmentScope,
    ) -> ClassifyContext<'c> {
        ClassifyContext {
            unit_url: &unit.url,
            unit_source: &unit.source,
            unit_root: Rc::ptr_eq(scope, &unit.root),
            full_document: unit.full_document,
            rebase: unit.imported,
            fragments,
            imports: &unit.imports,
            host: self.host,
            config: self.config,
            diagnostics: self,
        }
    }

    /// Compiles the children of `scope` in place.
    pub fn compile_scope<'s>(
        &'s self,
        unit: &'s Unit,
        scope: Handle,
        parent: Rc<FragmentScope>,
    ) -> ScopeFuture<'s> {
        Box::pin(async move {
            let definitions = find_definitions(&scope, &self.classify_context(unit, &scope, &parent));
            let fragments = FragmentScope::child(&parent, definitions);
            let mut collection = classify(&scope, &self.classify_context(unit, &scope, &fragments));
            let is_unit_root = Rc::ptr_eq(&scope, &unit.root);

            for reference in std::mem::take(&mut collection.fragment_refs) {
                self.expand_fragment(unit, &reference, &fragments).await;
            }

            for script in std::mem::take(&mut collection.build_scripts) {
                if !self.run_build_script(unit, &script).await {
                    dom::empty(&scope);
                    collection.reset();
                    return;
                }
            }

            self.substitute_texts(unit, std::mem::take(&mut collection.texts));
            self.substitute_attributes(unit, std::mem::take(&mut collection.attributed));
            self.inline_client_data(unit, std::mem::take(&mut collection.client_scripts));
            for raw in std::mem::take(&mut collection.raws) {
                dom::unwrap(&raw);
            }
            if is_unit_root {
                self.evaluate_exports(unit, std::mem::take(&mut collection.exports));
            }

            if unit.imported {
                self.rebase_urls(unit, std::mem::take(&mut collection.rebaseable));
            }

            for call in std::mem::take(&mut collection.component_calls) {
                self.compile_component_call(unit, &call, &fragments).await;
            }

            for group in std::mem::take(&mut collection.conditionals) {
                self.render_conditional(unit, group, &fragments).await;
            }

            for group in std::mem::take(&mut collection.loops) {
                self.render_loop(unit, group, &fragments).await;
            }
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EVALUATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Evaluates one expression source against the unit's bindings.
    pub fn evaluate(&self, unit: &Unit, source: &str) -> Result<Value, ScriptError> {
        let expr = self.expressions.lower(source)?;
        let interpreter = Interpreter::new(Realm {
            bindings: &unit.bindings,
            props: unit.props.clone(),
            store: self.store.clone(),
            host: self.host,
            file_url: unit.url.clone(),
            modules: HashMap::new(),
            config: self.config,
        });
        interpreter.eval_expression(&expr)
    }

    /// Substitutes `text`, publishing a diagnostic per failed marker.
    pub fn substitute_in(&self, unit: &Unit, text: &str) -> Substitution {
        let (result, failures) = substitute(text, |source| self.evaluate(unit, source));
        for failure in failures {
            self.diagnose(
                unit,
                DiagnosticTag::FailedExpression,
                format!("expression failed: {}", failure.error),
                &failure.source,
            );
        }
        result
    }

    /// The value of an attribute that feeds a binding or a prop: a single
    /// marker keeps its native value, anything else becomes a string.
    pub fn attribute_value(&self, unit: &Unit, raw: &str) -> Value {
        match self.substitute_in(unit, raw) {
            Substitution::Value(value) => value,
            Substitution::Text(text) => Value::string(text),
            Substitution::Unchanged => Value::string(raw),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STEP 2: BUILD SCRIPTS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Runs one `<script build>`. Returns false when the script failed and
    /// its scope must be discarded.
    async fn run_build_script(&self, unit: &Unit, script: &Handle) -> bool {
        let source = dom::text_content(script);
        let module = dom::get_attr(script, "type")
            .is_some_and(|t| t.trim().eq_ignore_ascii_case("module"));
        let first_line = source
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default()
            .to_string();
        debug!(url = %unit.url, module, "run build script");

        let result = async {
            let lowered = build_script::prepare(&source, module, self.host, &unit.url)?;
            for reexport in &lowered.reexports {
                self.diagnose(
                    unit,
                    DiagnosticTag::UnsupportedReexport,
                    "re-exports are not supported in build scripts".to_string(),
                    reexport,
                );
            }
            build_script::run(
                &lowered,
                ScriptContext {
                    bindings: &unit.bindings,
                    props: unit.props.clone(),
                    store: self.store.clone(),
                    host: self.host,
                    file_url: &unit.url,
                    config: self.config,
                },
            )
            .await?;
            Ok::<_, ScriptError>(lowered.aliases)
        }
        .await;

        match result {
            Ok(aliases) => {
                unit.aliases.borrow_mut().extend(aliases);
                dom::detach(script);
                true
            }
            Err(err) => {
                self.diagnose(
                    unit,
                    DiagnosticTag::FailedBuildScript,
                    format!("build script failed: {}", err),
                    &first_line,
                );
                false
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STEP 3: SUBSTITUTION
    // ═══════════════════════════════════════════════════════════════════════════

    fn substitute_texts(&self, unit: &Unit, texts: Vec<Handle>) {
        for node in texts {
            let Some(text) = dom::text_of(&node) else {
                continue;
            };
            match self.substitute_in(unit, &text) {
                Substitution::Unchanged => {}
                Substitution::Value(value) => dom::set_text(&node, &value.to_js_string()),
                Substitution::Text(out) => dom::set_text(&node, &out),
            }
        }
    }

    fn substitute_attributes(&self, unit: &Unit, elements: Vec<Handle>) {
        for node in elements {
            for (name, value) in dom::attrs(&node) {
                if name.eq_ignore_ascii_case("expand") || !contains_marker(&value) {
                    continue;
                }
                match self.substitute_in(unit, &value) {
                    Substitution::Unchanged => {}
                    Substitution::Value(Value::Undefined) => {
                        dom::remove_attr(&node, &name);
                    }
                    Substitution::Value(v) => dom::set_attr(&node, &name, &v.to_js_string()),
                    Substitution::Text(out) => dom::set_attr(&node, &name, &out),
                }
            }
            if let Some(raw) = dom::remove_attr(&node, "expand") {
                self.expand_attributes(unit, &node, &raw);
            }
        }
    }

    fn expand_attributes(&self, unit: &Unit, node: &Handle, raw: &str) {
        let Some(source) = full_marker(raw) else {
            self.diagnose(
                unit,
                DiagnosticTag::InvalidExpandResult,
                "expand must be a single {{ }} expression".to_string(),
                raw,
            );
            return;
        };
        match self.evaluate(unit, source) {
            Ok(Value::Object(entries)) => {
                for (key, value) in entries.borrow().iter() {
                    if value.is_undefined() || dom::has_attr(node, key) {
                        continue;
                    }
                    dom::set_attr(node, key, &value.to_js_string());
                }
            }
            Ok(other) => self.diagnose(
                unit,
                DiagnosticTag::InvalidExpandResult,
                format!("expand evaluated to {}, not an object", other.type_of()),
                source,
            ),
            Err(err) => self.diagnose(
                unit,
                DiagnosticTag::FailedExpression,
                format!("expression failed: {}", err),
                source,
            ),
        }
    }

    fn inline_client_data(&self, unit: &Unit, scripts: Vec<Handle>) {
        for script in scripts {
            let text = dom::text_content(&script);
            if !has_build_import(&text) {
                continue;
            }
            let (rewritten, issues) = inline_build_imports(&text, unit);
            dom::take_children(&script);
            dom::append(&script, &dom::create_text(&rewritten));

            for issue in issues {
                match issue {
                    InlineIssue::Missing(name) => self.diagnose(
                        unit,
                        DiagnosticTag::MissingExport,
                        format!("client script imports '{}', which is not exported", name),
                        &name,
                    ),
                    InlineIssue::Unserializable { name, reason } => self.diagnose(
                        unit,
                        DiagnosticTag::ClientScriptParse,
                        format!("'{}' cannot be sent to the client: {}", name, reason),
                        &name,
                    ),
                    InlineIssue::Unparsed(snippet) => self.diagnose(
                        unit,
                        DiagnosticTag::ClientScriptParse,
                        "unrecognized import from \"build\"".to_string(),
                        &snippet,
                    ),
                }
            }
        }
    }

    fn evaluate_exports(&self, unit: &Unit, exports: Vec<Handle>) {
        for node in exports {
            let name = dom::get_attr(&node, "name")
                .map(|n| n.trim().to_string())
                .unwrap_or_default();
            dom::detach(&node);
            if name.is_empty() {
                self.diagnose(
                    unit,
                    DiagnosticTag::MissingAttribute,
                    "<export> requires a name".to_string(),
                    "<export",
                );
                continue;
            }
            let exported = dom::get_attr(&node, "as")
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| name.clone());
            match unit.public_value(&name) {
                Some(value) => {
                    unit.exports.borrow_mut().insert(exported, value);
                }
                None => self.diagnose(
                    unit,
                    DiagnosticTag::MissingExport,
                    format!("'{}' is exported but never defined", name),
                    &name,
                ),
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STEP 4: URL REBASING
    // ═══════════════════════════════════════════════════════════════════════════

    fn rebase_urls(&self, unit: &Unit, elements: Vec<Handle>) {
        for node in elements {
            for (name, value) in dom::attrs(&node) {
                if self.config.is_rebase_attribute(&name) && is_relative_reference(&value) {
                    let rebased = self.host.resolve_url(&unit.url, value.trim());
                    dom::set_attr(&node, &name, &rebased);
                }
            }
        }
    }
}
